use crate::core::{AudioPacket, BufferStatus, MediaPacket, StreamKind, VideoPacket};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `PacketQueues::offer` 的结果
#[derive(Debug)]
pub enum Offer {
    Queued,
    /// 入队前丢弃了一帧最旧的视频
    QueuedDroppingOldest,
    /// 对应的流已停用，包被丢弃
    Discarded,
    /// 队列已满，包退回给调用方
    Full(MediaPacket),
}

/// 音频/视频两路解码队列，共用一把锁
///
/// 容量是协作式的：队列本身不拒绝 push，由解码线程在解码前检查容量。
/// 结束标志和每路的启用开关也放在同一把锁下。
pub struct PacketQueues {
    inner: Mutex<QueuePair>,
    audio_ready: Condvar,
    capacity: usize,
}

struct QueuePair {
    audio: VecDeque<Arc<AudioPacket>>,
    video: VecDeque<Arc<VideoPacket>>,
    audio_enabled: bool,
    video_enabled: bool,
    end_of_input: bool,
    consuming: bool, // 仅在 Playing 时允许取音频
}

impl QueuePair {
    fn should_decode(&self, capacity: usize) -> bool {
        let audio_wants = self.audio_enabled && self.audio.len() < capacity;
        let video_wants = self.video_enabled && self.video.len() < capacity;
        (audio_wants || video_wants) && !self.end_of_input
    }
}

impl PacketQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueuePair {
                audio: VecDeque::with_capacity(capacity),
                video: VecDeque::with_capacity(capacity),
                audio_enabled: false,
                video_enabled: false,
                end_of_input: false,
                consuming: false,
            }),
            audio_ready: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push_audio(&self, packet: Arc<AudioPacket>) {
        self.inner.lock().audio.push_back(packet);
        self.audio_ready.notify_all();
    }

    pub fn push_video(&self, packet: Arc<VideoPacket>) {
        self.inner.lock().video.push_back(packet);
    }

    /// 在容量允许时入队，否则把包原样退回
    ///
    /// 视频队列已满而音频已经饿死时，丢弃最旧的视频帧腾出位置，
    /// 否则解码线程会一直卡在这一帧上，音频永远等不到数据。
    pub fn offer(&self, packet: MediaPacket) -> Offer {
        let mut inner = self.inner.lock();
        match packet {
            MediaPacket::Audio(packet) => {
                if !inner.audio_enabled {
                    return Offer::Discarded;
                }
                if inner.audio.len() >= self.capacity {
                    return Offer::Full(MediaPacket::Audio(packet));
                }
                inner.audio.push_back(packet);
                drop(inner);
                self.audio_ready.notify_all();
                Offer::Queued
            }
            MediaPacket::Video(packet) => {
                if !inner.video_enabled {
                    return Offer::Discarded;
                }
                if inner.video.len() < self.capacity {
                    inner.video.push_back(packet);
                    return Offer::Queued;
                }
                if inner.audio_enabled && inner.audio.is_empty() {
                    inner.video.pop_front();
                    inner.video.push_back(packet);
                    return Offer::QueuedDroppingOldest;
                }
                Offer::Full(MediaPacket::Video(packet))
            }
        }
    }

    /// 需要继续解码时返回 (音频启用, 视频启用)，否则 None
    pub fn decode_targets(&self) -> Option<(bool, bool)> {
        let inner = self.inner.lock();
        if inner.should_decode(self.capacity) {
            Some((inner.audio_enabled, inner.video_enabled))
        } else {
            None
        }
    }

    pub fn pop_audio(&self) -> Option<Arc<AudioPacket>> {
        self.inner.lock().audio.pop_front()
    }

    pub fn pop_video(&self) -> Option<Arc<VideoPacket>> {
        self.inner.lock().video.pop_front()
    }

    /// 取音频包，队列为空时最多等待 `timeout`
    ///
    /// 到达输入末尾、停止消费（暂停/停止）时立即返回 None。
    /// 每次被唤醒都重新检查消费开关，等待中切换状态不会再取走数据。
    pub fn wait_pop_audio(&self, timeout: Duration) -> Option<Arc<AudioPacket>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if !inner.consuming {
                return None;
            }
            if let Some(packet) = inner.audio.pop_front() {
                return Some(packet);
            }
            if inner.end_of_input || !inner.audio_enabled {
                return None;
            }
            if self
                .audio_ready
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return if inner.consuming {
                    inner.audio.pop_front()
                } else {
                    None
                };
            }
        }
    }

    /// 打开/关闭音频消费，并唤醒正在等待的消费者
    pub fn set_consuming(&self, consuming: bool) {
        self.inner.lock().consuming = consuming;
        self.audio_ready.notify_all();
    }

    /// 取出所有 `pts <= now` 的视频帧，只返回最新的一帧
    ///
    /// 返回 (帧, 被跳过的过期帧数)。
    pub fn pop_video_due(&self, now: Duration) -> (Option<Arc<VideoPacket>>, usize) {
        let mut inner = self.inner.lock();
        let mut latest = None;
        let mut skipped = 0;
        while inner.video.front().map_or(false, |frame| frame.pts() <= now) {
            if latest.is_some() {
                skipped += 1;
            }
            latest = inner.video.pop_front();
        }
        (latest, skipped)
    }

    pub fn audio_len(&self) -> usize {
        self.inner.lock().audio.len()
    }

    pub fn video_len(&self) -> usize {
        self.inner.lock().video.len()
    }

    pub fn len(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Audio => self.audio_len(),
            StreamKind::Video => self.video_len(),
        }
    }

    /// 解码线程的背压判断
    pub fn should_decode(&self) -> bool {
        self.inner.lock().should_decode(self.capacity)
    }

    pub fn set_enabled(&self, kind: StreamKind, enabled: bool) {
        let mut inner = self.inner.lock();
        match kind {
            StreamKind::Audio => {
                inner.audio_enabled = enabled;
                if !enabled {
                    inner.audio.clear();
                }
            }
            StreamKind::Video => {
                inner.video_enabled = enabled;
                if !enabled {
                    inner.video.clear();
                }
            }
        }
        drop(inner);
        self.audio_ready.notify_all();
    }

    pub fn is_enabled(&self, kind: StreamKind) -> bool {
        let inner = self.inner.lock();
        match kind {
            StreamKind::Audio => inner.audio_enabled,
            StreamKind::Video => inner.video_enabled,
        }
    }

    pub fn set_end_of_input(&self, value: bool) {
        self.inner.lock().end_of_input = value;
        self.audio_ready.notify_all();
    }

    pub fn is_end_of_input(&self) -> bool {
        self.inner.lock().end_of_input
    }

    /// 输入已读完且两路队列都已消费完
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.end_of_input && inner.audio.is_empty() && inner.video.is_empty()
    }

    pub fn clear_audio(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.audio.len();
        inner.audio.clear();
        count
    }

    /// 清空两路队列，返回 (音频, 视频) 丢弃数量
    pub fn clear(&self) -> (usize, usize) {
        let mut inner = self.inner.lock();
        let counts = (inner.audio.len(), inner.video.len());
        inner.audio.clear();
        inner.video.clear();
        counts
    }

    /// 回到初始状态（新会话打开前）
    pub fn reset(&self, audio_enabled: bool, video_enabled: bool) {
        let mut inner = self.inner.lock();
        inner.audio.clear();
        inner.video.clear();
        inner.audio_enabled = audio_enabled;
        inner.video_enabled = video_enabled;
        inner.end_of_input = false;
    }

    pub fn status(&self) -> BufferStatus {
        let inner = self.inner.lock();
        BufferStatus {
            audio_packets: inner.audio.len(),
            video_packets: inner.video.len(),
            capacity: self.capacity,
            end_of_input: inner.end_of_input,
        }
    }
}
