use crate::core::{AudioPacket, PixelFormat, PlayerError, Result, SessionInfo, VideoPacket};
use crate::player::decoder_engine::{DecoderEngine, RawUnit};
use crate::player::library::MediaLibrary;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

type FfmpegUnit = RawUnit<util::frame::Video, util::frame::Audio>;

/// 视频解码链路：解码器 + RGBA 转换
struct VideoStage {
    index: usize,
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    scaler_key: (util::format::Pixel, u32, u32),
    time_base: f64,
    start: Option<f64>, // 流起始时间（秒）
}

/// 音频解码链路：解码器 + f32 交错重采样
struct AudioStage {
    index: usize,
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    start: Option<f64>,
    target_channels: u16,
    target_sample_rate: u32,
}

/// 基于 FFmpeg 的解码引擎
///
/// 解封装、解码、像素转换和重采样都在这里完成，解码线程只看到
/// `VideoPacket` / `AudioPacket`。
pub struct FfmpegDecoderEngine {
    input_ctx: Option<format::context::Input>,
    video: Option<VideoStage>,
    audio: Option<AudioStage>,
    pending: VecDeque<FfmpegUnit>, // 一个包可能解出多帧
    flushed: bool,
    origin: Option<f64>, // 时间戳零点（秒），音频时钟从这里开始计时
    info: SessionInfo,
    source_path: String,
    _library: MediaLibrary,
}

// SwsContext / SwrContext 本身不是 Send，但引擎只会被解码线程独占使用
unsafe impl Send for FfmpegDecoderEngine {}

impl FfmpegDecoderEngine {
    /// 打开媒体文件并建立需要的解码链路
    ///
    /// 某一路解码器创建失败时只停用该路；两路都不可用时返回 `NoPlayableStream`。
    pub fn open(
        library: &MediaLibrary,
        path: &str,
        enable_video: bool,
        enable_audio: bool,
    ) -> Result<Self> {
        info!("正在打开文件: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("无法打开文件 {}: {}", path, e)))?;

        let video = if enable_video {
            Self::open_video(&input_ctx)
        } else {
            None
        };
        let audio = if enable_audio {
            Self::open_audio(&input_ctx)
        } else {
            None
        };

        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoPlayableStream);
        }

        // 音频时钟从第一个音频样本开始计时，视频 pts 以同一零点对齐
        let origin = audio
            .as_ref()
            .and_then(|stage| stage.start)
            .or_else(|| video.as_ref().and_then(|stage| stage.start));
        debug!("时间戳零点: {:?}", origin);

        // 容器时长单位是 AV_TIME_BASE（微秒）
        let duration = match input_ctx.duration() {
            d if d > 0 => Some(Duration::from_micros(d as u64)),
            _ => None,
        };

        let info = SessionInfo {
            video_stream_index: video.as_ref().map(|stage| stage.index),
            audio_stream_index: audio.as_ref().map(|stage| stage.index),
            duration,
            width: video.as_ref().map_or(0, |stage| stage.decoder.width()),
            height: video.as_ref().map_or(0, |stage| stage.decoder.height()),
            channels: audio.as_ref().map_or(0, |stage| stage.target_channels),
            sample_rate: audio.as_ref().map_or(0, |stage| stage.target_sample_rate),
        };

        info!(
            "✅ 打开成功: 视频流 {:?} ({}x{}), 音频流 {:?} ({} Hz, {} 声道), 时长 {:?}",
            info.video_stream_index,
            info.width,
            info.height,
            info.audio_stream_index,
            info.sample_rate,
            info.channels,
            info.duration
        );

        Ok(Self {
            input_ctx: Some(input_ctx),
            video,
            audio,
            pending: VecDeque::new(),
            flushed: false,
            origin,
            info,
            source_path: path.to_string(),
            _library: library.clone(),
        })
    }

    fn open_video(input_ctx: &format::context::Input) -> Option<VideoStage> {
        let stream = input_ctx.streams().best(media::Type::Video)?;
        let index = stream.index();
        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;
        let start = timestamp_seconds(Some(stream.start_time()), time_base);

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video());
        match decoder {
            Ok(decoder) => {
                debug!(
                    "视频解码器: {}x{}, 格式: {:?}",
                    decoder.width(),
                    decoder.height(),
                    decoder.format()
                );
                Some(VideoStage {
                    index,
                    scaler_key: (decoder.format(), decoder.width(), decoder.height()),
                    decoder,
                    scaler: None,
                    time_base,
                    start,
                })
            }
            Err(e) => {
                warn!("⚠️  视频解码器创建失败，停用视频流 {}: {}", index, e);
                None
            }
        }
    }

    fn open_audio(input_ctx: &format::context::Input) -> Option<AudioStage> {
        let stream = input_ctx.streams().best(media::Type::Audio)?;
        let index = stream.index();
        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;
        let start = timestamp_seconds(Some(stream.start_time()), time_base);

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().audio());
        match decoder {
            Ok(decoder) => {
                let target_channels = output_channels(decoder.channels());
                let target_sample_rate = decoder.rate();
                debug!(
                    "音频解码器: {} Hz, {} 声道, 格式: {:?} → {} 声道 f32",
                    decoder.rate(),
                    decoder.channels(),
                    decoder.format(),
                    target_channels
                );
                if target_sample_rate == 0 {
                    warn!("⚠️  音频流 {} 采样率未知，停用音频", index);
                    return None;
                }
                Some(AudioStage {
                    index,
                    decoder,
                    resampler: None,
                    time_base,
                    start,
                    target_channels,
                    target_sample_rate,
                })
            }
            Err(e) => {
                warn!("⚠️  音频解码器创建失败，停用音频流 {}: {}", index, e);
                None
            }
        }
    }

    /// 把一个压缩包送进对应的解码器，解出的帧放进 pending
    fn decode_packet(&mut self, stream_index: usize, packet: &ffmpeg::Packet) -> Result<()> {
        if let Some(stage) = self.video.as_mut().filter(|s| s.index == stream_index) {
            stage.decoder.send_packet(packet)?;
            drain_video(&mut stage.decoder, &mut self.pending);
        } else if let Some(stage) = self.audio.as_mut().filter(|s| s.index == stream_index) {
            stage.decoder.send_packet(packet)?;
            drain_audio(&mut stage.decoder, &mut self.pending);
        }
        Ok(())
    }

    /// 输入结束：冲刷解码器里缓存的帧
    fn flush_decoders(&mut self) {
        if let Some(stage) = self.video.as_mut() {
            if let Err(e) = stage.decoder.send_eof() {
                debug!("视频解码器 flush 失败: {}", e);
            }
            drain_video(&mut stage.decoder, &mut self.pending);
        }
        if let Some(stage) = self.audio.as_mut() {
            if let Err(e) = stage.decoder.send_eof() {
                debug!("音频解码器 flush 失败: {}", e);
            }
            drain_audio(&mut stage.decoder, &mut self.pending);
        }
        debug!("解码器已冲刷，剩余 {} 帧", self.pending.len());
    }
}

fn drain_video(decoder: &mut codec::decoder::Video, pending: &mut VecDeque<FfmpegUnit>) {
    loop {
        let mut frame = util::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => pending.push_back(RawUnit::Video(frame)),
            Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                warn!("视频解码错误（已跳过）: {}", e);
                break;
            }
        }
    }
}

fn drain_audio(decoder: &mut codec::decoder::Audio, pending: &mut VecDeque<FfmpegUnit>) {
    loop {
        let mut frame = util::frame::Audio::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => pending.push_back(RawUnit::Audio(frame)),
            Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                warn!("音频解码错误（已跳过）: {}", e);
                break;
            }
        }
    }
}

/// 单声道保持单声道，其余全部混成立体声
fn output_channels(source_channels: u16) -> u16 {
    if source_channels == 1 {
        1
    } else {
        2
    }
}

fn channel_layout(channels: u16) -> util::channel_layout::ChannelLayout {
    match channels {
        1 => util::channel_layout::ChannelLayout::MONO,
        _ => util::channel_layout::ChannelLayout::STEREO,
    }
}

/// 流时间戳换算为秒，AV_NOPTS_VALUE 视为未知
fn timestamp_seconds(timestamp: Option<i64>, time_base: f64) -> Option<f64> {
    let timestamp = timestamp.filter(|&ts| ts != i64::MIN)?;
    let seconds = timestamp as f64 * time_base;
    seconds.is_finite().then_some(seconds)
}

/// 相对零点的播放位置，早于零点或未知的按 0 处理
fn rebase_timestamp(seconds: Option<f64>, origin: f64) -> Duration {
    match seconds.map(|s| s - origin) {
        Some(offset) if offset > 0.0 => Duration::from_secs_f64(offset),
        _ => Duration::ZERO,
    }
}

/// 交错 f32 的字节数据转为样本
fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(samples) => samples.to_vec(),
        // 未对齐时逐个拷贝
        Err(_) => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    }
}

impl DecoderEngine for FfmpegDecoderEngine {
    type Video = util::frame::Video;
    type Audio = util::frame::Audio;

    fn read_next(&mut self) -> Result<FfmpegUnit> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(unit);
            }
            if self.flushed {
                return Ok(RawUnit::EndOfInput);
            }

            let next = match self.input_ctx.as_mut() {
                Some(input_ctx) => input_ctx
                    .packets()
                    .next()
                    .map(|(stream, packet)| (stream.index(), packet)),
                None => return Ok(RawUnit::EndOfInput),
            };

            match next {
                Some((stream_index, packet)) => {
                    self.decode_packet(stream_index, &packet)?;
                }
                None => {
                    self.flush_decoders();
                    self.flushed = true;
                }
            }
        }
    }

    fn convert_video(&mut self, frame: util::frame::Video) -> Result<VideoPacket> {
        let stage = self
            .video
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("视频解码链路已关闭".to_string()))?;

        let width = frame.width();
        let height = frame.height();
        if width == 0 || height == 0 {
            return Err(PlayerError::DecodeError("视频帧尺寸为 0".to_string()));
        }

        // 源格式或尺寸变化时重建 scaler（YUV -> RGBA）
        let key = (frame.format(), width, height);
        if stage.scaler.is_none() || stage.scaler_key != key {
            stage.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
            stage.scaler_key = key;
        }

        let mut rgba_frame = util::frame::Video::empty();
        if let Some(scaler) = stage.scaler.as_mut() {
            scaler.run(&frame, &mut rgba_frame)?;
        }

        let seconds = timestamp_seconds(frame.timestamp(), stage.time_base);
        let origin = *self.origin.get_or_insert(seconds.unwrap_or(0.0));
        let pts = rebase_timestamp(seconds, origin);

        // 按行拷贝到连续内存（去掉 stride 填充）
        let row_size = width as usize * PixelFormat::RGBA.bytes_per_pixel();
        let mut data = vec![0u8; row_size * height as usize];
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            let src = frame_data
                .get(src_offset..src_offset + row_size)
                .ok_or_else(|| PlayerError::DecodeError("RGBA 数据不完整".to_string()))?;
            data[dst_offset..dst_offset + row_size].copy_from_slice(src);
        }

        Ok(VideoPacket::new(data, width, height, pts))
    }

    fn resample_audio(&mut self, frame: util::frame::Audio) -> Result<AudioPacket> {
        let stage = self
            .audio
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("音频解码链路已关闭".to_string()))?;

        if stage.resampler.is_none() {
            let source_layout = if frame.channel_layout().is_empty() {
                util::channel_layout::ChannelLayout::default(frame.channels() as i32)
            } else {
                frame.channel_layout()
            };
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch f32",
                frame.rate(),
                frame.channels(),
                stage.target_sample_rate,
                stage.target_channels
            );
            stage.resampler = Some(software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                channel_layout(stage.target_channels),
                stage.target_sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = stage.resampler.as_mut() {
            resampler.run(&frame, &mut resampled)?;
        }

        let seconds = timestamp_seconds(frame.timestamp(), stage.time_base);
        let origin = *self.origin.get_or_insert(seconds.unwrap_or(0.0));
        let pts = rebase_timestamp(seconds, origin);

        let sample_len = resampled.samples() * stage.target_channels as usize;
        let byte_len = sample_len * std::mem::size_of::<f32>();
        let bytes = resampled
            .data(0)
            .get(..byte_len)
            .ok_or_else(|| PlayerError::DecodeError("重采样数据不完整".to_string()))?;

        Ok(AudioPacket::new(
            bytes_to_samples(bytes),
            stage.target_channels,
            stage.target_sample_rate,
            pts,
        ))
    }

    fn session_info(&self) -> &SessionInfo {
        &self.info
    }

    fn close(&mut self) {
        if self.input_ctx.is_none() {
            return;
        }
        self.pending.clear();
        self.video = None;
        self.audio = None;
        self.input_ctx = None;
        debug!("🗑️  已关闭: {}", self.source_path);
    }

    fn description(&self) -> String {
        format!("FFmpeg: {}", self.source_path)
    }
}

impl Drop for FfmpegDecoderEngine {
    fn drop(&mut self) {
        DecoderEngine::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_channels() {
        assert_eq!(output_channels(1), 1);
        assert_eq!(output_channels(2), 2);
        assert_eq!(output_channels(6), 2);
    }

    #[test]
    fn test_timestamp_seconds() {
        assert_eq!(timestamp_seconds(Some(4), 0.5), Some(2.0));
        assert_eq!(timestamp_seconds(Some(i64::MIN), 0.001), None);
        assert_eq!(timestamp_seconds(None, 0.001), None);
    }

    #[test]
    fn test_timestamps_rebased_to_stream_start() {
        // 90kHz 时间基，流从 1.4s 开始（常见于 MPEG-TS）
        let time_base = 1.0 / 90_000.0;
        let origin = 1.4;
        let first = timestamp_seconds(Some(126_000), time_base);
        let later = timestamp_seconds(Some(129_600), time_base);
        assert_eq!(rebase_timestamp(first, origin), Duration::ZERO);
        let rebased = rebase_timestamp(later, origin);
        assert!((rebased.as_secs_f64() - 0.04).abs() < 1e-6);

        // 早于零点或未知时间戳落在 0
        let early = timestamp_seconds(Some(120_000), time_base);
        assert_eq!(rebase_timestamp(early, origin), Duration::ZERO);
        assert_eq!(rebase_timestamp(None, origin), Duration::ZERO);
        assert_eq!(rebase_timestamp(Some(2.0), 0.0), Duration::from_secs(2));
    }

    #[test]
    fn test_bytes_to_samples() {
        let samples = [0.5f32, -0.25];
        let bytes: &[u8] = bytemuck::cast_slice(&samples);
        assert_eq!(bytes_to_samples(bytes), vec![0.5, -0.25]);

        // 错位一个字节后走逐个拷贝
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(bytes);
        assert_eq!(bytes_to_samples(&shifted[1..]), vec![0.5, -0.25]);
    }

    #[test]
    fn test_open_missing_file() {
        let library = MediaLibrary::acquire().unwrap();
        let result = FfmpegDecoderEngine::open(&library, "/nonexistent/clip.mp4", true, true);
        assert!(matches!(result, Err(PlayerError::OpenError(_))));
    }
}
