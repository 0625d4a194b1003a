use crate::core::{PlayerError, Result};
use crate::player::audio_playback::{AudioBackend, AudioChunk, AudioFeed, NextBuffer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 回调之间没放完的半个包
#[derive(Default)]
struct Leftover {
    chunk: Option<AudioChunk>,
    offset: usize, // 已输出的样本数（交错）
}

impl Leftover {
    fn reset(&mut self) {
        self.chunk = None;
        self.offset = 0;
    }
}

/// 源格式到设备格式的转换状态（声道映射 + 线性插值重采样）
struct OutputState {
    leftover: Leftover,
    output_channels: usize,
    resampling: bool,
    step: f64, // 每个输出帧前进的源帧数
    phase: f64,
    buffered: usize,
    prev: Vec<f32>,
    cur: Vec<f32>,
    mixed: Vec<f32>,
}

impl OutputState {
    fn new(source_channels: u16, source_rate: u32, output_channels: u16, output_rate: u32) -> Self {
        let source_channels = source_channels.max(1) as usize;
        Self {
            leftover: Leftover::default(),
            output_channels: output_channels.max(1) as usize,
            resampling: source_rate != output_rate,
            step: source_rate as f64 / output_rate.max(1) as f64,
            phase: 0.0,
            buffered: 0,
            prev: vec![0.0; source_channels],
            cur: vec![0.0; source_channels],
            mixed: vec![0.0; source_channels],
        }
    }

    fn reset(&mut self) {
        self.leftover.reset();
        self.phase = 0.0;
        self.buffered = 0;
    }

    /// 准备下一个输出帧需要的源帧，拉不到数据时返回 false（状态不变）
    fn advance<P: FnMut() -> NextBuffer>(&mut self, pull: &mut P) -> bool {
        if !self.resampling {
            return read_frame(&mut self.leftover, &mut self.cur, pull);
        }
        while self.buffered < 2 {
            if !read_frame(&mut self.leftover, &mut self.prev, pull) {
                return false;
            }
            std::mem::swap(&mut self.prev, &mut self.cur);
            self.buffered += 1;
        }
        while self.phase >= 1.0 {
            if !read_frame(&mut self.leftover, &mut self.prev, pull) {
                return false;
            }
            std::mem::swap(&mut self.prev, &mut self.cur);
            self.phase -= 1.0;
        }
        true
    }

    fn render(&mut self, out: &mut [f32], volume: f32) {
        if !self.resampling {
            map_channels(&self.cur, out, volume);
            return;
        }
        let t = self.phase as f32;
        for ((mixed, prev), cur) in self.mixed.iter_mut().zip(&self.prev).zip(&self.cur) {
            *mixed = prev + (cur - prev) * t;
        }
        map_channels(&self.mixed, out, volume);
        self.phase += self.step;
    }
}

impl Default for OutputState {
    fn default() -> Self {
        Self::new(2, 48000, 2, 48000)
    }
}

/// 从剩余数据中读出一个源帧，需要时拉取新包
fn read_frame<P: FnMut() -> NextBuffer>(
    leftover: &mut Leftover,
    frame: &mut [f32],
    pull: &mut P,
) -> bool {
    loop {
        if leftover.chunk.is_none() {
            match pull() {
                NextBuffer::Ready(chunk) => {
                    leftover.chunk = Some(chunk);
                    leftover.offset = 0;
                }
                NextBuffer::Underrun | NextBuffer::Finished => return false,
            }
        }
        if let Some(chunk) = leftover.chunk.as_ref() {
            let end = leftover.offset + frame.len();
            if let Some(samples) = chunk.get(leftover.offset..end) {
                frame.copy_from_slice(samples);
                leftover.offset = end;
                if end >= chunk.len() {
                    leftover.reset();
                }
                return true;
            }
        }
        // 不足一帧的尾巴丢弃
        leftover.reset();
    }
}

/// 声道映射：单声道输出取平均，其余按声道循环复制
fn map_channels(source: &[f32], out: &mut [f32], volume: f32) {
    if out.len() == 1 && source.len() > 1 {
        out[0] = source.iter().sum::<f32>() / source.len() as f32 * volume;
        return;
    }
    for (i, sample) in out.iter_mut().enumerate() {
        *sample = source[i % source.len()] * volume;
    }
}

/// 检查配置是否兼容
fn is_config_compatible(
    channels: u16,
    sample_rate: u32,
    supported: &SupportedStreamConfigRange,
) -> bool {
    let rate_in_range = sample_rate >= supported.min_sample_rate().0
        && sample_rate <= supported.max_sample_rate().0;

    let channels_match = channels == supported.channels();

    rate_in_range && channels_match && supported.sample_format() == SampleFormat::F32
}

/// 选择设备输出格式：优先源格式，其次换声道，再换常见采样率，
/// 最后取设备第一个 f32 配置
fn select_config(
    channels: u16,
    sample_rate: u32,
    supported: &[SupportedStreamConfigRange],
) -> Option<(u16, u32)> {
    let candidates = [
        (channels, sample_rate),
        (2, sample_rate),
        (1, sample_rate),
        (channels, 48000),
        (2, 48000),
        (channels, 44100),
        (2, 44100),
    ];
    candidates
        .into_iter()
        .find(|&(ch, rate)| {
            supported
                .iter()
                .any(|range| is_config_compatible(ch, rate, range))
        })
        .or_else(|| {
            supported
                .iter()
                .find(|range| range.sample_format() == SampleFormat::F32)
                .map(|range| {
                    let rate =
                        sample_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
                    (range.channels(), rate)
                })
        })
}

/// 音频输出 - 使用 cpal 播放音频
///
/// 设备回调按自己的节奏从 `AudioFeed` 拉取整包数据，
/// 一个回调放不下的部分留到下一次。设备不支持源格式时
/// 在回调里做声道映射和重采样。
pub struct CpalAudioBackend {
    device: Device,
    config: Option<StreamConfig>,
    stream: Option<Stream>,
    output: Arc<Mutex<OutputState>>,
    volume: Arc<Mutex<f32>>,
}

// cpal::Stream 本身不是 Send，但后端被播放引擎的锁独占，流的创建和控制都在锁内完成
unsafe impl Send for CpalAudioBackend {}

impl CpalAudioBackend {
    /// 使用默认输出设备
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        Ok(Self {
            device,
            config: None,
            stream: None,
            output: Arc::new(Mutex::new(OutputState::default())),
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    /// 获取实际使用的音频配置
    pub fn get_config(&self) -> Option<(u32, u16)> {
        self.config
            .as_ref()
            .map(|config| (config.sample_rate.0, config.channels))
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已关闭");
        }
        self.output.lock().reset();
    }
}

/// 填满一次设备回调的缓冲区，数据不够时补静音
fn fill_output(
    data: &mut [f32],
    state: &mut OutputState,
    volume: f32,
    mut pull: impl FnMut() -> NextBuffer,
) {
    let channels = state.output_channels;
    let mut written = 0;
    for frame in data.chunks_exact_mut(channels) {
        if !state.advance(&mut pull) {
            break;
        }
        state.render(frame, volume);
        written += channels;
    }
    data[written..].fill(0.0);
}

impl AudioBackend for CpalAudioBackend {
    fn setup_stream(&mut self, channels: u16, sample_rate: u32, feed: AudioFeed) -> Result<()> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);
        self.close_stream();

        let supported: Vec<SupportedStreamConfigRange> = self
            .device
            .supported_output_configs()
            .map_err(|e| PlayerError::StreamSetupError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();
        let (output_channels, output_rate) = select_config(channels, sample_rate, &supported)
            .ok_or_else(|| {
                PlayerError::StreamSetupError("音频设备没有可用的 f32 输出配置".to_string())
            })?;
        if (output_channels, output_rate) != (channels, sample_rate) {
            warn!(
                "⚠️  设备不支持 {} Hz, {} 声道，改用 {} Hz, {} 声道输出",
                sample_rate, channels, output_rate, output_channels
            );
        }

        let config = StreamConfig {
            channels: output_channels,
            sample_rate: cpal::SampleRate(output_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        *self.output.lock() =
            OutputState::new(channels, sample_rate, output_channels, output_rate);

        let output = self.output.clone();
        let volume = self.volume.clone();
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    let mut output = output.lock();
                    fill_output(data, &mut output, vol, || feed.get_next_buffer());
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::StreamSetupError(format!("创建音频流失败: {}", e)))?;

        // 部分平台建流后立即开始播放，统一等 start_stream
        if let Err(e) = stream.pause() {
            debug!("新建音频流暂停失败: {}", e);
        }

        self.stream = Some(stream);
        self.config = Some(config);
        Ok(())
    }

    fn set_playback_speed(&mut self, speed: f32) {
        if (speed - 1.0).abs() > f32::EPSILON {
            warn!("⚠️  音频设备不支持变速播放 ({}x)，保持原速", speed);
        }
    }

    fn start_stream(&mut self) {
        if let Some(stream) = self.stream.as_ref() {
            match stream.play() {
                Ok(()) => info!("音频输出已启动"),
                Err(e) => error!("启动音频流失败: {}", e),
            }
        }
    }

    fn pause_stream(&mut self) {
        if let Some(stream) = self.stream.as_ref() {
            if let Err(e) = stream.pause() {
                warn!("暂停音频流失败: {}", e);
            }
        }
    }

    fn stop_stream(&mut self) {
        self.pause_stream();
        self.output.lock().reset();
        debug!("音频输出已停止");
    }
}

impl Drop for CpalAudioBackend {
    fn drop(&mut self) {
        self.close_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AudioPacket;
    use cpal::{SampleRate, SupportedBufferSize};
    use std::collections::VecDeque;
    use std::time::Duration;

    fn chunk(samples: &[f32], channels: u16) -> AudioChunk {
        AudioChunk::from(Arc::new(AudioPacket::new(
            samples.to_vec(),
            channels,
            48000,
            Duration::ZERO,
        )))
    }

    fn puller(chunks: Vec<AudioChunk>) -> impl FnMut() -> NextBuffer {
        let mut queue = VecDeque::from(chunks);
        move || match queue.pop_front() {
            Some(chunk) => NextBuffer::Ready(chunk),
            None => NextBuffer::Underrun,
        }
    }

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_leftover_carries_to_next_callback() {
        let mut pull = puller(vec![chunk(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2)]);
        let mut state = OutputState::new(2, 48000, 2, 48000);

        let mut first = [0.0; 4];
        fill_output(&mut first, &mut state, 1.0, &mut pull);
        assert_eq!(first, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(state.leftover.offset, 4);

        let mut second = [9.0; 4];
        fill_output(&mut second, &mut state, 1.0, &mut pull);
        assert_eq!(second, [5.0, 6.0, 0.0, 0.0]);
        assert!(state.leftover.chunk.is_none());
    }

    #[test]
    fn test_silence_when_finished() {
        let mut state = OutputState::default();
        let mut data = [1.0; 8];
        fill_output(&mut data, &mut state, 1.0, || NextBuffer::Finished);
        assert_eq!(data, [0.0; 8]);
    }

    #[test]
    fn test_volume_applied() {
        let mut state = OutputState::default();
        let mut data = [0.0; 4];
        fill_output(
            &mut data,
            &mut state,
            0.5,
            puller(vec![chunk(&[1.0, -1.0], 2), chunk(&[0.5, 0.5], 2)]),
        );
        assert_eq!(data, [0.5, -0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_reset_drops_partial_chunk() {
        let mut pull = puller(vec![
            chunk(&[1.0, 2.0, 3.0, 4.0], 2),
            chunk(&[7.0, 8.0], 2),
        ]);
        let mut state = OutputState::default();
        let mut data = [0.0; 2];
        fill_output(&mut data, &mut state, 1.0, &mut pull);
        state.reset();
        fill_output(&mut data, &mut state, 1.0, &mut pull);
        assert_eq!(data, [7.0, 8.0]);
    }

    #[test]
    fn test_mono_source_on_stereo_device() {
        let mut state = OutputState::new(1, 48000, 2, 48000);
        let mut data = [0.0; 6];
        fill_output(&mut data, &mut state, 1.0, puller(vec![chunk(&[0.1, 0.2], 1)]));
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_stereo_source_on_mono_device() {
        let mut state = OutputState::new(2, 48000, 1, 48000);
        let mut data = [0.0; 2];
        fill_output(
            &mut data,
            &mut state,
            1.0,
            puller(vec![chunk(&[1.0, 0.0, 0.5, 0.5], 2)]),
        );
        assert_eq!(data, [0.5, 0.5]);
    }

    #[test]
    fn test_downsample_two_to_one() {
        let mut state = OutputState::new(1, 96000, 1, 48000);
        let mut data = [9.0; 5];
        fill_output(
            &mut data,
            &mut state,
            1.0,
            puller(vec![chunk(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 1)]),
        );
        assert_eq!(data, [0.0, 2.0, 4.0, 6.0, 0.0]);
    }

    #[test]
    fn test_upsample_interpolates_across_chunks() {
        let mut state = OutputState::new(1, 24000, 1, 48000);
        let mut pull = puller(vec![chunk(&[0.0, 1.0], 1), chunk(&[2.0, 3.0], 1)]);
        let mut data = [9.0; 8];
        fill_output(&mut data, &mut state, 1.0, &mut pull);
        assert_eq!(data, [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 0.0, 0.0]);
    }

    #[test]
    fn test_select_config_prefers_source_format() {
        let supported = [
            range(2, 44100, 96000, SampleFormat::F32),
            range(1, 44100, 96000, SampleFormat::F32),
        ];
        assert_eq!(select_config(1, 48000, &supported), Some((1, 48000)));
        assert_eq!(select_config(2, 44100, &supported), Some((2, 44100)));
    }

    #[test]
    fn test_select_config_falls_back() {
        let stereo_48k = [
            range(2, 48000, 48000, SampleFormat::F32),
            range(1, 22050, 22050, SampleFormat::I16),
        ];
        // 单声道 22.05kHz 的源只能输出到立体声 48kHz
        assert_eq!(select_config(1, 22050, &stereo_48k), Some((2, 48000)));
        assert_eq!(select_config(6, 48000, &stereo_48k), Some((2, 48000)));

        let surround_only = [range(6, 44100, 44100, SampleFormat::F32)];
        assert_eq!(select_config(2, 22050, &surround_only), Some((6, 44100)));

        let integer_only = [range(2, 44100, 48000, SampleFormat::I16)];
        assert_eq!(select_config(2, 48000, &integer_only), None);
    }
}
