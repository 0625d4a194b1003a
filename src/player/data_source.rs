use crate::core::{
    AudioPacket, BufferStatus, PlaybackState, PlayerConfig, PlayerError, Result, SessionInfo,
    StreamKind, VideoPacket,
};
use crate::player::decode_thread::DecodeThread;
use crate::player::decoder_engine::{DecoderEngine, PacketProducer};
#[cfg(feature = "ffmpeg")]
use crate::player::library::MediaLibrary;
use crate::player::packet_queue::PacketQueues;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::process;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 重新打开数据源（停止后再次播放时使用）
type SessionOpener = Box<dyn FnMut() -> Result<Box<dyn PacketProducer>> + Send>;

/// 播放引擎接收数据源事件的接口
pub(crate) trait PlaybackListener: Send + Sync {
    /// 该引擎消费哪一路数据
    fn stream_kind(&self) -> StreamKind;

    fn state_changed(&self, previous: PlaybackState, next: PlaybackState);

    /// 解码会话变化（新文件或重新打开）
    fn source_reloaded(&self, info: &SessionInfo);

    fn playback_speed_changed(&self, speed: f32);
}

struct SourceShared {
    queues: Arc<PacketQueues>,
    state: RwLock<PlaybackState>,
    info: RwLock<Option<SessionInfo>>,
}

/// 数据源暴露给播放引擎的窄接口：取包、查询状态、读取会话信息
#[derive(Clone)]
pub struct SourceHandle {
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    pub fn state(&self) -> PlaybackState {
        *self.shared.state.read()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.info.read().clone()
    }

    /// 取下一个音频包，最多等待 `timeout`
    pub fn pop_audio(&self, timeout: Duration) -> Option<Arc<AudioPacket>> {
        self.shared.queues.wait_pop_audio(timeout)
    }

    /// 取出到期的视频帧（过期帧会被跳过）
    pub fn pop_video_due(&self, now: Duration) -> (Option<Arc<VideoPacket>>, usize) {
        self.shared.queues.pop_video_due(now)
    }

    pub fn clear_audio(&self) -> usize {
        self.shared.queues.clear_audio()
    }

    /// 本会话内停用某一路（输出端配置失败时）
    pub fn disable_stream(&self, kind: StreamKind) {
        self.shared.queues.set_enabled(kind, false);
    }

    pub fn is_stream_enabled(&self, kind: StreamKind) -> bool {
        self.shared.queues.is_enabled(kind)
    }

    /// 输入已读完且该路队列为空
    pub fn is_exhausted(&self, kind: StreamKind) -> bool {
        let queues = &self.shared.queues;
        queues.is_end_of_input() && queues.len(kind) == 0
    }

    #[cfg(test)]
    pub(crate) fn queues(&self) -> &Arc<PacketQueues> {
        &self.shared.queues
    }
}

struct Lifecycle {
    decode_thread: DecodeThread,
    opener: Option<SessionOpener>,
    session_live: bool,
    playback_speed: f32,
}

/// 数据源 - 解码会话 + 播放状态机
///
/// 持有解码线程和两路队列，把状态切换同步广播给所有播放引擎。
/// 所有方法都只需要 `&self`，可以放进 `Arc` 在多个线程中调用。
pub struct DataSource {
    config: PlayerConfig,
    shared: Arc<SourceShared>,
    lifecycle: Mutex<Lifecycle>,
    listeners: Mutex<Vec<Weak<dyn PlaybackListener>>>,
}

impl DataSource {
    pub fn new(config: PlayerConfig) -> Self {
        let config = config.normalized();
        let queues = Arc::new(PacketQueues::new(config.queue_capacity));
        let decode_thread = DecodeThread::new(queues.clone(), config.idle_interval());
        Self {
            shared: Arc::new(SourceShared {
                queues,
                state: RwLock::new(PlaybackState::Stopped),
                info: RwLock::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle {
                decode_thread,
                opener: None,
                session_live: false,
                playback_speed: 1.0,
            }),
            listeners: Mutex::new(Vec::new()),
            config,
        }
    }

    /// 用 FFmpeg 打开媒体文件，返回是否成功
    #[cfg(feature = "ffmpeg")]
    pub fn load_from_file(&self, library: &MediaLibrary, path: &str) -> bool {
        match self.open_file(library, path) {
            Ok(_) => true,
            Err(e) => {
                error!("{} ❌ 打开文件失败: {}", log_ctx(), e);
                false
            }
        }
    }

    /// 用 FFmpeg 打开媒体文件
    #[cfg(feature = "ffmpeg")]
    pub fn open_file(&self, library: &MediaLibrary, path: &str) -> Result<SessionInfo> {
        use crate::player::demuxer::FfmpegDecoderEngine;

        let library = library.clone();
        let path = path.to_string();
        let enable_video = self.config.enable_video;
        let enable_audio = self.config.enable_audio;
        self.load_with(move || {
            FfmpegDecoderEngine::open(&library, &path, enable_video, enable_audio)
        })
    }

    /// 用任意解码引擎建立会话
    ///
    /// `open` 会在停止后再次播放时被重新调用。打开失败不会留下任何会话。
    pub fn load_with<E, F>(&self, mut open: F) -> Result<SessionInfo>
    where
        E: DecoderEngine,
        F: FnMut() -> Result<E> + Send + 'static,
    {
        self.stop();

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.opener = Some(Box::new(move || {
            open().map(|engine| Box::new(engine) as Box<dyn PacketProducer>)
        }));

        let result = self.open_session(&mut lifecycle);
        if result.is_err() {
            lifecycle.opener = None;
        }
        result
    }

    fn open_session(&self, lifecycle: &mut Lifecycle) -> Result<SessionInfo> {
        let opener = lifecycle
            .opener
            .as_mut()
            .ok_or_else(|| PlayerError::Other("没有打开的数据源".to_string()))?;
        let mut producer = opener()?;
        let info = producer.session_info().clone();

        if !info.has_audio() && !info.has_video() {
            producer.close();
            return Err(PlayerError::NoPlayableStream);
        }

        info!(
            "{} 📂 打开会话: {} (视频流 {:?}, 音频流 {:?}, 时长 {:?})",
            log_ctx(),
            producer.description(),
            info.video_stream_index,
            info.audio_stream_index,
            info.duration
        );

        self.shared.queues.reset(info.has_audio(), info.has_video());
        *self.shared.info.write() = Some(info.clone());
        lifecycle.decode_thread.start(producer);
        lifecycle.session_live = true;

        let speed = lifecycle.playback_speed;
        for listener in self.live_listeners() {
            listener.source_reloaded(&info);
            listener.playback_speed_changed(speed);
        }
        Ok(info)
    }

    /// 注册播放引擎，会话已存在时立即补发当前信息
    pub(crate) fn attach(&self, listener: Arc<dyn PlaybackListener>) {
        let lifecycle = self.lifecycle.lock();
        self.listeners.lock().push(Arc::downgrade(&listener));

        if let Some(info) = self.session_info() {
            listener.source_reloaded(&info);
            listener.playback_speed_changed(lifecycle.playback_speed);
        }
        let state = self.state();
        if state != PlaybackState::Stopped {
            listener.state_changed(PlaybackState::Stopped, state);
        }
        debug!(
            "{} 🔗 注册 {} 播放引擎",
            log_ctx(),
            listener.stream_kind().as_str()
        );
    }

    fn live_listeners(&self) -> Vec<Arc<dyn PlaybackListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| listener.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    /// 设置状态并同步通知所有引擎，返回前引擎都已看到新状态
    fn transition(&self, previous: PlaybackState, next: PlaybackState) {
        // 消费开关只在 Playing 期间打开，被唤醒的音频回调总能看到新状态
        if next == PlaybackState::Playing {
            self.shared.queues.set_consuming(true);
            *self.shared.state.write() = next;
        } else {
            *self.shared.state.write() = next;
            self.shared.queues.set_consuming(false);
        }
        info!("{} 🎬 状态切换: {:?} -> {:?}", log_ctx(), previous, next);
        for listener in self.live_listeners() {
            listener.state_changed(previous, next);
        }
    }

    /// 没有引擎消费的流不再解码，避免它占满队列卡住另一路
    fn disable_unconsumed_streams(&self) {
        let listeners = self.live_listeners();
        for kind in [StreamKind::Audio, StreamKind::Video] {
            let consumed = listeners.iter().any(|l| l.stream_kind() == kind);
            if !consumed && self.shared.queues.is_enabled(kind) {
                info!(
                    "{} 没有 {} 播放引擎，停止解码该路",
                    log_ctx(),
                    kind.as_str()
                );
                self.shared.queues.set_enabled(kind, false);
            }
        }
    }

    /// 播放（Stopped -> Playing，Paused -> Playing）
    ///
    /// 停止后再次播放会重新打开数据源。
    pub fn play(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let current = self.state();
        match current {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {}
            PlaybackState::Stopped => {
                if !lifecycle.session_live {
                    info!("{} 从停止状态恢复播放，重新打开数据源", log_ctx());
                    self.open_session(&mut lifecycle)?;
                }
            }
        }
        self.disable_unconsumed_streams();
        self.transition(current, PlaybackState::Playing);
        Ok(())
    }

    /// 暂停（Playing -> Paused）
    pub fn pause(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        match self.state() {
            PlaybackState::Paused => Ok(()),
            PlaybackState::Playing => {
                self.transition(PlaybackState::Playing, PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Stopped => Err(PlayerError::InvalidTransition {
                from: PlaybackState::Stopped,
                to: PlaybackState::Paused,
            }),
        }
    }

    /// 停止并拆除解码会话（可重复调用，任何线程都可调用）
    ///
    /// 拆除顺序：先停输出端，再停解码线程（引擎随之关闭），最后清空队列。
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let current = self.state();
        if current != PlaybackState::Stopped {
            self.transition(current, PlaybackState::Stopped);
        }
        if !lifecycle.session_live && !lifecycle.decode_thread.is_running() {
            return;
        }

        lifecycle.decode_thread.stop();
        lifecycle.session_live = false;
        info!("{} ✅ 停止完成，解码会话已拆除", log_ctx());
    }

    /// 设置播放速率并通知引擎
    pub fn set_playback_speed(&self, speed: f32) {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            warn!("{} ⚠️  忽略非法播放速率: {}", log_ctx(), speed);
            return;
        };
        self.lifecycle.lock().playback_speed = speed;
        for listener in self.live_listeners() {
            listener.playback_speed_changed(speed);
        }
    }

    pub fn playback_speed(&self) -> f32 {
        self.lifecycle.lock().playback_speed
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.read()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.info.read().clone()
    }

    pub fn has_video(&self) -> bool {
        self.session_info().map_or(false, |info| info.has_video())
    }

    pub fn has_audio(&self) -> bool {
        self.session_info().map_or(false, |info| info.has_audio())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.session_info().and_then(|info| info.duration)
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.shared.queues.status()
    }

    /// 输入已读完且所有队列已消费完
    pub fn is_finished(&self) -> bool {
        self.shared.queues.is_drained()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn handle(&self) -> SourceHandle {
        SourceHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for DataSource {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        self.stop();
    }
}
