use crate::core::{
    PlaybackClock, PlaybackState, PlayerError, Result, SessionInfo, StreamKind, VideoPacket,
};
use crate::player::audio_playback::{AudioFeed, AudioPlayback};
use crate::player::data_source::{DataSource, PlaybackListener, SourceHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 视频渲染端（纹理由宿主持有）
pub trait RenderSink: Send {
    /// 新会话开始，按视频尺寸创建纹理
    ///
    /// 返回错误时本次会话停用视频，音频照常播放。
    fn create_texture(&mut self, width: u32, height: u32) -> Result<()>;

    /// 上传一帧 RGBA 数据
    fn update_texture(&mut self, frame: &Arc<VideoPacket>);

    /// 停止播放，清空画面
    fn clear_texture(&mut self);
}

/// 视频播放引擎
///
/// 由宿主按刷新节奏调用 `update()`，按主时钟从队列里取出到期的帧。
pub struct VideoPlayback {
    source: SourceHandle,
    sink: Mutex<Box<dyn RenderSink>>,
    master: RwLock<Option<AudioFeed>>,
    fallback: PlaybackClock,
    audio_ended: AtomicBool, // 音频播完后改由墙钟接续
    current: Mutex<Option<Arc<VideoPacket>>>,
    enabled: AtomicBool,
    frames_presented: AtomicU64,
    frames_skipped: AtomicU64,
}

impl VideoPlayback {
    /// 创建并注册到数据源
    pub fn new(source: &DataSource, sink: Box<dyn RenderSink>) -> Arc<Self> {
        let playback = Arc::new(Self {
            source: source.handle(),
            sink: Mutex::new(sink),
            master: RwLock::new(None),
            fallback: PlaybackClock::new(),
            audio_ended: AtomicBool::new(false),
            current: Mutex::new(None),
            enabled: AtomicBool::new(false),
            frames_presented: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
        });
        source.attach(playback.clone());
        playback
    }

    /// 以音频时钟为主时钟
    pub fn sync_to(&self, audio: &AudioPlayback) {
        *self.master.write() = Some(audio.feed());
    }

    /// 当前用于同步的时钟位置
    ///
    /// 音频可用时跟随音频；音频轨道先播完时从音频最后的位置切到墙钟，
    /// 剩下的视频帧照常到期。
    pub fn clock(&self) -> Duration {
        match self.master.read().as_ref() {
            Some(feed) if feed.is_active() => {
                if !self.source.is_exhausted(StreamKind::Audio) {
                    return feed.playing_offset();
                }
                if !self.audio_ended.swap(true, Ordering::AcqRel) {
                    let position = feed.playing_offset();
                    self.fallback.set_time(position);
                    debug!("音频已播完，视频改用墙钟 (从 {:?} 继续)", position);
                }
                self.fallback.now()
            }
            _ => self.fallback.now(),
        }
    }

    /// 取出到期的帧并提交给渲染端，返回是否提交了新帧
    pub fn update(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire)
            || self.source.state() != PlaybackState::Playing
        {
            return false;
        }

        let now = self.clock();
        let (frame, skipped) = self.source.pop_video_due(now);
        if skipped > 0 {
            self.frames_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
            trace!("⏭️  跳过 {} 个过期视频帧 (clock={:?})", skipped, now);
        }

        match frame {
            Some(frame) => {
                self.sink.lock().update_texture(&frame);
                *self.current.lock() = Some(frame);
                self.frames_presented.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// 最近一次提交的帧
    pub fn current_frame(&self) -> Option<Arc<VideoPacket>> {
        self.current.lock().clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl PlaybackListener for VideoPlayback {
    fn stream_kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn state_changed(&self, previous: PlaybackState, next: PlaybackState) {
        debug!("视频引擎状态: {:?} -> {:?}", previous, next);
        match next {
            PlaybackState::Playing => self.fallback.play(),
            PlaybackState::Paused => self.fallback.pause(),
            PlaybackState::Stopped => {
                self.fallback.pause();
                self.fallback.set_time(Duration::ZERO);
                self.audio_ended.store(false, Ordering::Release);
                self.current.lock().take();
                if self.is_enabled() {
                    self.sink.lock().clear_texture();
                }
            }
        }
    }

    fn source_reloaded(&self, info: &SessionInfo) {
        self.fallback.pause();
        self.fallback.set_time(Duration::ZERO);
        self.audio_ended.store(false, Ordering::Release);
        self.current.lock().take();
        self.frames_presented.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);

        if !info.has_video() {
            self.enabled.store(false, Ordering::Release);
            return;
        }

        let result = self.sink.lock().create_texture(info.width, info.height);
        match result {
            Ok(()) => {
                self.enabled.store(true, Ordering::Release);
                info!("🖼️  视频纹理已创建: {}x{}", info.width, info.height);
            }
            Err(e) => {
                warn!("⚠️  创建视频纹理失败，本次会话停用视频: {}", e);
                self.enabled.store(false, Ordering::Release);
                self.source.disable_stream(StreamKind::Video);
            }
        }
    }

    fn playback_speed_changed(&self, speed: f32) {
        self.fallback.set_rate(speed as f64);
    }
}

type TextureHook = Box<dyn FnMut(u32, u32) -> bool + Send>;
type FrameHook = Box<dyn FnMut(&Arc<VideoPacket>) + Send>;
type ClearHook = Box<dyn FnMut() + Send>;

/// 由宿主提供回调的渲染端，未设置的回调直接忽略
#[derive(Default)]
pub struct CallbackRenderSink {
    on_create: Option<TextureHook>,
    on_frame: Option<FrameHook>,
    on_clear: Option<ClearHook>,
}

impl CallbackRenderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 false 表示宿主无法创建纹理
    pub fn on_create(mut self, hook: impl FnMut(u32, u32) -> bool + Send + 'static) -> Self {
        self.on_create = Some(Box::new(hook));
        self
    }

    pub fn on_frame(mut self, hook: impl FnMut(&Arc<VideoPacket>) + Send + 'static) -> Self {
        self.on_frame = Some(Box::new(hook));
        self
    }

    pub fn on_clear(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_clear = Some(Box::new(hook));
        self
    }
}

impl RenderSink for CallbackRenderSink {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<()> {
        let created = match self.on_create.as_mut() {
            Some(hook) => hook(width, height),
            None => true,
        };
        if created {
            Ok(())
        } else {
            Err(PlayerError::StreamSetupError(format!(
                "宿主无法创建 {}x{} 纹理",
                width, height
            )))
        }
    }

    fn update_texture(&mut self, frame: &Arc<VideoPacket>) {
        if let Some(hook) = self.on_frame.as_mut() {
            hook(frame);
        }
    }

    fn clear_texture(&mut self) {
        if let Some(hook) = self.on_clear.as_mut() {
            hook();
        }
    }
}

/// 渲染事件（发往 UI 线程）
#[derive(Debug, Clone)]
pub enum RenderEvent {
    Create { width: u32, height: u32 },
    Frame(Arc<VideoPacket>),
    Clear,
}

/// 把渲染请求转发到通道的渲染端，UI 线程在自己的循环里消费
pub struct ChannelRenderSink {
    sender: Sender<RenderEvent>,
}

impl ChannelRenderSink {
    pub fn new() -> (Self, Receiver<RenderEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, event: RenderEvent) {
        // 接收端已关闭时丢弃
        if self.sender.send(event).is_err() {
            trace!("渲染通道已关闭");
        }
    }
}

impl RenderSink for ChannelRenderSink {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<()> {
        self.sender
            .send(RenderEvent::Create { width, height })
            .map_err(|_| PlayerError::StreamSetupError("渲染通道已关闭".to_string()))
    }

    fn update_texture(&mut self, frame: &Arc<VideoPacket>) {
        self.send(RenderEvent::Frame(frame.clone()));
    }

    fn clear_texture(&mut self) {
        self.send(RenderEvent::Clear);
    }
}
