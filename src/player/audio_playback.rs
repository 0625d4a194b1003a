use crate::core::{
    AudioClock, AudioPacket, PlaybackState, PlayerError, Result, SessionInfo, StreamKind,
};
use crate::player::data_source::{DataSource, PlaybackListener, SourceHandle};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 音频输出后端（设备或宿主回调）
///
/// 由播放引擎调用，引擎本身不关心具体的音频库。
pub trait AudioBackend: Send {
    /// 声道数/采样率确定后配置输出流，`feed` 用于在实时回调里拉取数据
    fn setup_stream(&mut self, channels: u16, sample_rate: u32, feed: AudioFeed) -> Result<()>;

    fn set_playback_speed(&mut self, speed: f32);

    fn start_stream(&mut self);

    fn pause_stream(&mut self);

    fn stop_stream(&mut self);
}

/// 一次拉取得到的整包数据，和队列共享同一份样本
#[derive(Debug, Clone)]
pub struct AudioChunk {
    packet: Arc<AudioPacket>,
}

impl AudioChunk {
    /// 每声道采样数
    pub fn sample_count(&self) -> usize {
        self.packet.sample_count()
    }

    pub fn channels(&self) -> u16 {
        self.packet.channels()
    }
}

impl From<Arc<AudioPacket>> for AudioChunk {
    fn from(packet: Arc<AudioPacket>) -> Self {
        Self { packet }
    }
}

impl Deref for AudioChunk {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.packet.samples()
    }
}

/// `get_next_buffer` 的结果
#[derive(Debug)]
pub enum NextBuffer {
    Ready(AudioChunk),
    /// 暂时没有数据（未播放或等待超时），后端应输出静音
    Underrun,
    /// 输入已结束且数据已全部消费
    Finished,
}

struct AudioShared {
    source: SourceHandle,
    clock: AudioClock,
    disabled: AtomicBool,
    wait_timeout: Duration,
    underruns: AtomicU64,
}

/// 音频拉取句柄，交给后端在实时回调线程中使用
#[derive(Clone)]
pub struct AudioFeed {
    shared: Arc<AudioShared>,
}

impl AudioFeed {
    /// 拉取下一块样本
    ///
    /// 每次返回一个完整的包，分块大小由后端自己决定。
    /// 队列为空时最多等待配置的超时时间，不会无限阻塞实时线程。
    pub fn get_next_buffer(&self) -> NextBuffer {
        let shared = &self.shared;
        if shared.disabled.load(Ordering::Acquire) {
            return NextBuffer::Finished;
        }
        if shared.source.state() != PlaybackState::Playing {
            return NextBuffer::Underrun;
        }

        match shared.source.pop_audio(shared.wait_timeout) {
            Some(packet) => {
                shared.clock.advance(packet.duration());
                NextBuffer::Ready(AudioChunk { packet })
            }
            // 等待期间被暂停或停止
            None if shared.source.state() != PlaybackState::Playing => NextBuffer::Underrun,
            None if shared.source.is_exhausted(StreamKind::Audio) => NextBuffer::Finished,
            None => {
                let count = shared.underruns.fetch_add(1, Ordering::Relaxed) + 1;
                if count == 1 || count % 100 == 0 {
                    debug!("音频数据不足，输出静音（第 {} 次）", count);
                }
                NextBuffer::Underrun
            }
        }
    }

    /// 对外可见的播放位置（已扣除延迟补偿）
    pub fn playing_offset(&self) -> Duration {
        self.shared.clock.playing_offset()
    }

    /// 音频是否能作为主时钟
    pub fn is_active(&self) -> bool {
        !self.shared.disabled.load(Ordering::Acquire)
            && self.shared.source.is_stream_enabled(StreamKind::Audio)
    }
}

/// 音频播放引擎
///
/// 把后端固定节奏的拉取请求和大小不一的解码音频包对接起来，
/// 并维护音频时钟（视频以它为主时钟）。
pub struct AudioPlayback {
    feed: AudioFeed,
    backend: Mutex<Box<dyn AudioBackend>>,
}

impl AudioPlayback {
    /// 创建并注册到数据源，延迟补偿取配置值
    pub fn new(source: &DataSource, backend: Box<dyn AudioBackend>) -> Arc<Self> {
        let offset = source.config().offset_correction();
        Self::with_offset_correction(source, backend, offset)
    }

    pub fn with_offset_correction(
        source: &DataSource,
        backend: Box<dyn AudioBackend>,
        offset_correction: Duration,
    ) -> Arc<Self> {
        let playback = Arc::new(Self {
            feed: AudioFeed {
                shared: Arc::new(AudioShared {
                    source: source.handle(),
                    clock: AudioClock::new(offset_correction),
                    disabled: AtomicBool::new(true),
                    wait_timeout: source.config().data_wait_timeout(),
                    underruns: AtomicU64::new(0),
                }),
            },
            backend: Mutex::new(backend),
        });
        source.attach(playback.clone());
        playback
    }

    pub fn get_next_buffer(&self) -> NextBuffer {
        self.feed.get_next_buffer()
    }

    pub fn feed(&self) -> AudioFeed {
        self.feed.clone()
    }

    pub fn offset_correction(&self) -> Duration {
        self.feed.shared.clock.offset_correction()
    }

    pub fn set_offset_correction(&self, offset: Duration) {
        self.feed.shared.clock.set_offset_correction(offset);
    }

    /// 已消费的播放位置（未补偿）
    pub fn position(&self) -> Duration {
        self.feed.shared.clock.position()
    }

    /// 对外可见的播放位置
    pub fn playing_offset(&self) -> Duration {
        self.feed.playing_offset()
    }

    /// 把后端报告的位置换算成对外位置
    pub fn corrected_position(&self, backend_position: Duration) -> Duration {
        self.feed.shared.clock.corrected(backend_position)
    }

    /// 输出流是否可用（配置失败后为 false）
    pub fn is_enabled(&self) -> bool {
        !self.feed.shared.disabled.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u64 {
        self.feed.shared.underruns.load(Ordering::Relaxed)
    }
}

impl PlaybackListener for AudioPlayback {
    fn stream_kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn state_changed(&self, previous: PlaybackState, next: PlaybackState) {
        if !self.is_enabled() {
            return;
        }
        debug!("音频引擎状态: {:?} -> {:?}", previous, next);
        let mut backend = self.backend.lock();
        match next {
            PlaybackState::Playing => backend.start_stream(),
            PlaybackState::Paused => backend.pause_stream(),
            PlaybackState::Stopped => {
                backend.stop_stream();
                let cleared = self.feed.shared.source.clear_audio();
                if cleared > 0 {
                    debug!("停止时丢弃 {} 个音频包", cleared);
                }
            }
        }
    }

    fn source_reloaded(&self, info: &SessionInfo) {
        let shared = &self.feed.shared;
        shared.clock.reset();
        shared.underruns.store(0, Ordering::Relaxed);

        if !info.has_audio() {
            shared.disabled.store(true, Ordering::Release);
            return;
        }

        let result =
            self.backend
                .lock()
                .setup_stream(info.channels, info.sample_rate, self.feed.clone());
        match result {
            Ok(()) => {
                shared.disabled.store(false, Ordering::Release);
                info!(
                    "🔊 音频输出已配置: {} Hz, {} 声道",
                    info.sample_rate, info.channels
                );
            }
            Err(e) => {
                warn!("⚠️  音频输出配置失败，本次会话停用音频: {}", e);
                shared.disabled.store(true, Ordering::Release);
                shared.source.disable_stream(StreamKind::Audio);
            }
        }
    }

    fn playback_speed_changed(&self, speed: f32) {
        if self.is_enabled() {
            self.backend.lock().set_playback_speed(speed);
        }
    }
}

type SetupHook = Box<dyn FnMut(u16, u32) -> bool + Send>;
type SpeedHook = Box<dyn FnMut(f32) + Send>;
type StateHook = Box<dyn FnMut() + Send>;

/// 宿主回调后端：输出流的各项操作交给宿主提供的回调
///
/// 宿主通过 `AudioPlayback::feed()` 自行拉取数据。
pub struct CallbackAudioBackend {
    on_setup: Option<SetupHook>,
    on_speed: Option<SpeedHook>,
    on_start: Option<StateHook>,
    on_pause: Option<StateHook>,
    on_stop: Option<StateHook>,
}

impl CallbackAudioBackend {
    pub fn new() -> Self {
        Self {
            on_setup: None,
            on_speed: None,
            on_start: None,
            on_pause: None,
            on_stop: None,
        }
    }

    /// 返回 false 表示宿主拒绝该格式
    pub fn on_setup(mut self, hook: impl FnMut(u16, u32) -> bool + Send + 'static) -> Self {
        self.on_setup = Some(Box::new(hook));
        self
    }

    pub fn on_speed(mut self, hook: impl FnMut(f32) + Send + 'static) -> Self {
        self.on_speed = Some(Box::new(hook));
        self
    }

    pub fn on_start(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_pause(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_pause = Some(Box::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }
}

impl Default for CallbackAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CallbackAudioBackend {
    fn setup_stream(&mut self, channels: u16, sample_rate: u32, _feed: AudioFeed) -> Result<()> {
        let accepted = match self.on_setup.as_mut() {
            Some(hook) => hook(channels, sample_rate),
            None => true,
        };
        if accepted {
            Ok(())
        } else {
            Err(PlayerError::StreamSetupError(format!(
                "宿主拒绝输出格式: {} Hz, {} 声道",
                sample_rate, channels
            )))
        }
    }

    fn set_playback_speed(&mut self, speed: f32) {
        if let Some(hook) = self.on_speed.as_mut() {
            hook(speed);
        }
    }

    fn start_stream(&mut self) {
        if let Some(hook) = self.on_start.as_mut() {
            hook();
        }
    }

    fn pause_stream(&mut self) {
        if let Some(hook) = self.on_pause.as_mut() {
            hook();
        }
    }

    fn stop_stream(&mut self) {
        if let Some(hook) = self.on_stop.as_mut() {
            hook();
        }
    }
}
