use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 媒体流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
        }
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
}

impl PixelFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA => 4,
        }
    }
}

/// 解码后的音频包（不可变，交错 f32 PCM）
#[derive(Debug)]
pub struct AudioPacket {
    samples: Vec<f32>,
    sample_count: usize, // 每声道采样数
    channels: u16,
    sample_rate: u32,
    pts: Duration,
}

impl AudioPacket {
    /// 创建音频包，`samples` 长度必须是声道数的整数倍
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, pts: Duration) -> Self {
        let channels = channels.max(1);
        let sample_count = samples.len() / channels as usize;
        Self {
            samples,
            sample_count,
            channels,
            sample_rate,
            pts,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// 本包代表的播放时长
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.sample_count as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// 解码后的视频帧（不可变，固定 RGBA 格式）
#[derive(Debug)]
pub struct VideoPacket {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pts: Duration,
}

impl VideoPacket {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: Duration) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * PixelFormat::RGBA.bytes_per_pixel()
        );
        Self {
            data,
            width,
            height,
            pts,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::RGBA
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }
}

/// 队列中流转的媒体包，队列与消费者共享同一份数据
#[derive(Debug, Clone)]
pub enum MediaPacket {
    Audio(Arc<AudioPacket>),
    Video(Arc<VideoPacket>),
}

impl MediaPacket {
    pub fn pts(&self) -> Duration {
        match self {
            MediaPacket::Audio(packet) => packet.pts(),
            MediaPacket::Video(packet) => packet.pts(),
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Stopped
    }
}

/// 解码会话信息（打开成功后生成）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInfo {
    pub video_stream_index: Option<usize>,
    pub audio_stream_index: Option<usize>,
    pub duration: Option<Duration>, // 未知时为 None
    pub width: u32,
    pub height: u32,
    pub channels: u16,    // 重采样后的目标声道数
    pub sample_rate: u32, // 输出采样率
}

impl SessionInfo {
    pub fn has_video(&self) -> bool {
        self.video_stream_index.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream_index.is_some()
    }
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStatus {
    /// 音频包队列长度
    pub audio_packets: usize,

    /// 视频帧队列长度
    pub video_packets: usize,

    /// 每路队列容量
    pub capacity: usize,

    /// 是否已读到输入末尾
    pub end_of_input: bool,
}
