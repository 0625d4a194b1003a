use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 默认的输出延迟补偿
pub const DEFAULT_OFFSET_CORRECTION: Duration = Duration::from_millis(50);

/// 音频时钟 - 由音频消费端推进的播放位置
///
/// 实时回调线程会写入位置，所以内部只用原子量，不加锁。
/// 对外报告的位置 = 已消费位置 - 延迟补偿（不小于 0）。
#[derive(Debug)]
pub struct AudioClock {
    position_ns: AtomicU64,
    offset_ns: AtomicU64,
}

impl AudioClock {
    pub fn new(offset_correction: Duration) -> Self {
        Self {
            position_ns: AtomicU64::new(0),
            offset_ns: AtomicU64::new(duration_to_ns(offset_correction)),
        }
    }

    /// 推进已消费的播放位置
    pub fn advance(&self, delta: Duration) {
        self.position_ns
            .fetch_add(duration_to_ns(delta), Ordering::AcqRel);
    }

    /// 重置到 0（切换数据源时）
    pub fn reset(&self) {
        self.position_ns.store(0, Ordering::Release);
    }

    /// 后端已消费的位置（未补偿）
    pub fn position(&self) -> Duration {
        Duration::from_nanos(self.position_ns.load(Ordering::Acquire))
    }

    pub fn offset_correction(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }

    /// 修改延迟补偿，下一次查询即生效
    pub fn set_offset_correction(&self, offset: Duration) {
        self.offset_ns.store(duration_to_ns(offset), Ordering::Release);
    }

    /// 对外可见的播放位置
    pub fn playing_offset(&self) -> Duration {
        self.corrected(self.position())
    }

    /// 把后端报告的位置换算成对外位置
    pub fn corrected(&self, backend_position: Duration) -> Duration {
        backend_position.saturating_sub(self.offset_correction())
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET_CORRECTION)
    }
}

fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// 播放时钟 - 没有音频时钟可用时，视频按墙钟推进
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base: Duration,        // 基准位置
    base_instant: Instant, // 基准时刻
    playback_rate: f64,    // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: Duration, // 暂停时的位置
}

impl ClockInner {
    fn now(&self) -> Duration {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_secs_f64() * self.playback_rate;
            self.base + Duration::from_secs_f64(elapsed.max(0.0))
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base: Duration::ZERO,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: Duration::ZERO,
            })),
        }
    }

    /// 获取当前播放位置
    pub fn now(&self) -> Duration {
        self.inner.lock().now()
    }

    /// 设置播放位置
    pub fn set_time(&self, position: Duration) {
        let mut inner = self.inner.lock();
        inner.base = position;
        inner.base_instant = Instant::now();
        inner.paused_at = position;
    }

    /// 开始走时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.base = inner.now();
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate.max(0.0);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
