//! 测试用的解码引擎和输出后端

use crate::core::{AudioPacket, PlayerError, Result, SessionInfo, VideoPacket};
use crate::player::audio_playback::{AudioBackend, AudioFeed};
use crate::player::decoder_engine::{DecoderEngine, RawUnit};
use crate::player::video_playback::RenderSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MOCK_SAMPLE_RATE: u32 = 48000;
/// 每个模拟音频包 10ms
pub const MOCK_AUDIO_FRAMES: usize = 480;
pub const MOCK_VIDEO_INTERVAL: Duration = Duration::from_millis(40);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockUnit {
    Audio,
    Video,
    Fail,
}

/// 按脚本产出单元的解码引擎
pub struct MockEngine {
    script: VecDeque<MockUnit>,
    pattern: Option<Vec<MockUnit>>,
    cursor: usize,
    info: SessionInfo,
    audio_pts: Duration,
    video_pts: Duration,
    pub closed: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
}

impl MockEngine {
    fn with_info(info: SessionInfo) -> Self {
        Self {
            script: VecDeque::new(),
            pattern: None,
            cursor: 0,
            info,
            audio_pts: Duration::ZERO,
            video_pts: Duration::ZERO,
            closed: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn info(has_audio: bool, has_video: bool) -> SessionInfo {
        SessionInfo {
            video_stream_index: has_video.then_some(0),
            audio_stream_index: has_audio.then_some(1),
            duration: Some(Duration::from_secs(60)),
            width: 2,
            height: 2,
            channels: 2,
            sample_rate: MOCK_SAMPLE_RATE,
        }
    }

    /// 按顺序产出 `units`，之后报告输入结束
    pub fn scripted(units: &[MockUnit]) -> Self {
        let has_audio = units.contains(&MockUnit::Audio);
        let has_video = units.contains(&MockUnit::Video);
        let mut engine = Self::with_info(Self::info(has_audio, has_video));
        engine.script = units.iter().copied().collect();
        engine
    }

    /// 无限循环产出 `pattern`
    pub fn endless(pattern: &[MockUnit]) -> Self {
        let has_audio = pattern.contains(&MockUnit::Audio);
        let has_video = pattern.contains(&MockUnit::Video);
        let mut engine = Self::with_info(Self::info(has_audio, has_video));
        engine.pattern = Some(pattern.to_vec());
        engine
    }

    /// 音视频流都存在，但每个单元都解码失败
    pub fn silent() -> Self {
        let mut engine = Self::with_info(Self::info(true, true));
        engine.pattern = Some(vec![MockUnit::Fail]);
        engine
    }

    fn next_unit(&mut self) -> Option<MockUnit> {
        match &self.pattern {
            Some(pattern) if !pattern.is_empty() => {
                let unit = pattern[self.cursor % pattern.len()];
                self.cursor += 1;
                Some(unit)
            }
            _ => self.script.pop_front(),
        }
    }
}

impl DecoderEngine for MockEngine {
    type Video = Duration;
    type Audio = Duration;

    fn read_next(&mut self) -> Result<RawUnit<Duration, Duration>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.next_unit() {
            Some(MockUnit::Audio) => {
                let pts = self.audio_pts;
                self.audio_pts += Duration::from_millis(10);
                Ok(RawUnit::Audio(pts))
            }
            Some(MockUnit::Video) => {
                let pts = self.video_pts;
                self.video_pts += MOCK_VIDEO_INTERVAL;
                Ok(RawUnit::Video(pts))
            }
            Some(MockUnit::Fail) => Err(PlayerError::DecodeError("corrupt unit".to_string())),
            None => Ok(RawUnit::EndOfInput),
        }
    }

    fn convert_video(&mut self, pts: Duration) -> Result<VideoPacket> {
        Ok(VideoPacket::new(vec![0; 16], 2, 2, pts))
    }

    fn resample_audio(&mut self, pts: Duration) -> Result<AudioPacket> {
        let channels = self.info.channels;
        Ok(AudioPacket::new(
            vec![0.25; MOCK_AUDIO_FRAMES * channels as usize],
            channels,
            MOCK_SAMPLE_RATE,
            pts,
        ))
    }

    fn session_info(&self) -> &SessionInfo {
        &self.info
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        "mock engine".to_string()
    }
}

/// 记录收到的调用的音频后端
#[derive(Default)]
pub struct RecordingAudioBackend {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub feed: Arc<Mutex<Option<AudioFeed>>>,
    pub reject_setup: bool,
}

impl RecordingAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_setup: true,
            ..Self::default()
        }
    }
}

impl AudioBackend for RecordingAudioBackend {
    fn setup_stream(&mut self, channels: u16, sample_rate: u32, feed: AudioFeed) -> Result<()> {
        self.calls
            .lock()
            .push(format!("setup {} {}", channels, sample_rate));
        if self.reject_setup {
            return Err(PlayerError::StreamSetupError("rejected".to_string()));
        }
        *self.feed.lock() = Some(feed);
        Ok(())
    }

    fn set_playback_speed(&mut self, speed: f32) {
        self.calls.lock().push(format!("speed {}", speed));
    }

    fn start_stream(&mut self) {
        self.calls.lock().push("start".to_string());
    }

    fn pause_stream(&mut self) {
        self.calls.lock().push("pause".to_string());
    }

    fn stop_stream(&mut self) {
        self.calls.lock().push("stop".to_string());
    }
}

/// 记录收到的帧的渲染端
#[derive(Default)]
pub struct RecordingRenderSink {
    pub textures: Arc<Mutex<Vec<(u32, u32)>>>,
    pub frames: Arc<Mutex<Vec<Duration>>>,
    pub clears: Arc<AtomicUsize>,
    pub reject_create: bool,
}

impl RecordingRenderSink {
    /// 创建纹理总是失败
    pub fn rejecting() -> Self {
        Self {
            reject_create: true,
            ..Self::default()
        }
    }
}

impl RenderSink for RecordingRenderSink {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<()> {
        if self.reject_create {
            return Err(PlayerError::StreamSetupError("no texture".to_string()));
        }
        self.textures.lock().push((width, height));
        Ok(())
    }

    fn update_texture(&mut self, frame: &Arc<VideoPacket>) {
        self.frames.lock().push(frame.pts());
    }

    fn clear_texture(&mut self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}
