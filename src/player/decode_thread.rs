use crate::core::MediaPacket;
use crate::player::decoder_engine::{PacketProducer, Produced};
use crate::player::packet_queue::{Offer, PacketQueues};
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

// 前 N 个包打印日志，之后每 100 个打印一次
const LOG_FIRST_N: usize = 5;

#[derive(Default)]
struct DecodeStats {
    audio: usize,
    video: usize,
    failed: usize,
    dropped_video: usize,
}

/// 解码线程管理器
/// - 持续解码，直到两路队列都到达容量或读到输入末尾
/// - 队列占用是唯一的背压信号，满了就暂停生产
/// - 线程退出时关闭解码引擎，stop() 返回即代表引擎已释放
pub struct DecodeThread {
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    queues: Arc<PacketQueues>,
    idle_interval: Duration,
}

impl DecodeThread {
    pub fn new(queues: Arc<PacketQueues>, idle_interval: Duration) -> Self {
        Self {
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            queues,
            idle_interval,
        }
    }

    /// 启动解码线程，已在运行时什么都不做（多余的引擎会被关闭）
    ///
    /// 返回是否真正启动了新线程。
    pub fn start(&mut self, mut producer: Box<dyn PacketProducer>) -> bool {
        if self.thread_handle.is_some() {
            warn!(
                "{} ⚠ 解码线程已在运行，忽略重复启动: {}",
                log_ctx(),
                producer.description()
            );
            producer.close();
            return false;
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let queues = self.queues.clone();
        let idle_interval = self.idle_interval;

        let spawned = thread::Builder::new()
            .name("decode".to_string())
            .spawn(move || {
                Self::decode_loop(&mut *producer, &queues, &running, idle_interval);
                producer.close();
                info!("{} 🗑️  解码引擎已关闭", log_ctx());
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                true
            }
            Err(e) => {
                error!("{} ❌ 创建解码线程失败: {}", log_ctx(), e);
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// 停止线程（可重复调用）
    /// - 清除运行标志
    /// - join 线程
    /// - 清空两路队列并复位输入末尾标记
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            info!("{} 🛑 DecodeThread::stop() 等待解码线程退出", log_ctx());
            if handle.join().is_err() {
                error!("{} ❌ 解码线程异常退出", log_ctx());
            }
        }

        let (audio, video) = self.queues.clear();
        if audio > 0 || video > 0 {
            info!(
                "{} 🗑️  清空队列: {} 音频包, {} 视频帧",
                log_ctx(),
                audio,
                video
            );
        }
        self.queues.set_end_of_input(false);
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// 解码循环（在独立线程中运行）
    ///
    /// 关键点：
    /// - 每轮先检查两路队列，任意一路未满（且启用）且未到末尾才继续解码
    /// - 队列已满的包暂存在本地，等有空位再入队（只有视频满且音频空时丢最旧的视频帧）
    /// - 内层循环同样检查运行标志，保证 stop() 能及时返回
    fn decode_loop(
        producer: &mut dyn PacketProducer,
        queues: &PacketQueues,
        running: &AtomicBool,
        idle_interval: Duration,
    ) {
        info!("{} 🎬 解码线程启动: {}", log_ctx(), producer.description());

        let mut stats = DecodeStats::default();
        let mut parked: Option<MediaPacket> = None;

        while running.load(Ordering::SeqCst) {
            if let Some(packet) = parked.take() {
                parked = Self::enqueue(queues, packet, &mut stats);
            }

            while parked.is_none() && running.load(Ordering::SeqCst) {
                let Some((audio_enabled, video_enabled)) = queues.decode_targets() else {
                    break;
                };

                match producer.produce(audio_enabled, video_enabled) {
                    Produced::Video(packet) => {
                        stats.video += 1;
                        if stats.video <= LOG_FIRST_N || stats.video % 100 == 0 {
                            debug!(
                                "{} 📦 解码视频帧 #{} pts={:?}",
                                log_ctx(),
                                stats.video,
                                packet.pts()
                            );
                        }
                        parked = Self::enqueue(
                            queues,
                            MediaPacket::Video(Arc::new(packet)),
                            &mut stats,
                        );
                    }
                    Produced::Audio(packet) => {
                        stats.audio += 1;
                        if stats.audio <= LOG_FIRST_N || stats.audio % 100 == 0 {
                            debug!(
                                "{} 🔊 解码音频包 #{} pts={:?}",
                                log_ctx(),
                                stats.audio,
                                packet.pts()
                            );
                        }
                        parked = Self::enqueue(
                            queues,
                            MediaPacket::Audio(Arc::new(packet)),
                            &mut stats,
                        );
                    }
                    Produced::Discarded => {}
                    Produced::Failed(reason) => {
                        stats.failed += 1;
                        debug!("{} 解码错误（已跳过）: {}", log_ctx(), reason);
                    }
                    Produced::EndOfInput => {
                        queues.set_end_of_input(true);
                        info!("{} 📄 解码到达输入末尾，等待队列消费完", log_ctx());
                        break;
                    }
                }
            }

            // 不忙等：短睡眠，避免 CPU 空转
            thread::sleep(idle_interval);
        }

        info!(
            "{} 🛑 解码线程退出（音频 {} 包，视频 {} 帧，跳过 {} 个坏包，丢弃 {} 帧）",
            log_ctx(),
            stats.audio,
            stats.video,
            stats.failed,
            stats.dropped_video
        );
    }

    fn enqueue(
        queues: &PacketQueues,
        packet: MediaPacket,
        stats: &mut DecodeStats,
    ) -> Option<MediaPacket> {
        match queues.offer(packet) {
            Offer::Queued | Offer::Discarded => None,
            Offer::QueuedDroppingOldest => {
                stats.dropped_video += 1;
                debug!("{} 音频队列已空，丢弃最旧的视频帧", log_ctx());
                None
            }
            Offer::Full(packet) => Some(packet),
        }
    }
}

impl Drop for DecodeThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!(
                "{} ⚠ DecodeThread 被 drop，但未调用 stop()，正在尝试优雅停止",
                log_ctx()
            );
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StreamKind;
    use crate::player::test_support::{MockEngine, MockUnit};
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn thread_with(capacity: usize, audio: bool, video: bool) -> (DecodeThread, Arc<PacketQueues>) {
        let queues = Arc::new(PacketQueues::new(capacity));
        queues.reset(audio, video);
        let thread = DecodeThread::new(queues.clone(), Duration::from_millis(1));
        (thread, queues)
    }

    #[test]
    fn test_audio_only_fills_to_capacity() {
        let (mut thread, queues) = thread_with(10, true, false);
        let engine = MockEngine::endless(&[MockUnit::Audio, MockUnit::Video]);
        assert!(thread.start(Box::new(engine)));

        assert!(wait_until(Duration::from_secs(2), || queues.audio_len() == 10));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queues.audio_len(), 10);
        assert_eq!(queues.video_len(), 0);
        thread.stop();
    }

    #[test]
    fn test_resumes_after_consumption() {
        let (mut thread, queues) = thread_with(10, true, false);
        thread.start(Box::new(MockEngine::endless(&[MockUnit::Audio])));
        assert!(wait_until(Duration::from_secs(2), || queues.audio_len() == 10));

        let first = queues.pop_audio().unwrap();
        assert_eq!(first.pts(), Duration::ZERO);
        assert!(queues.audio_len() <= 9);
        assert!(wait_until(Duration::from_secs(2), || queues.audio_len() == 10));
        for _ in 0..20 {
            assert!(queues.audio_len() <= 10);
            thread::sleep(Duration::from_millis(1));
        }
        thread.stop();
    }

    #[test]
    fn test_capacity_holds_for_both_streams() {
        let (mut thread, queues) = thread_with(4, true, true);
        // 视频远多于音频，视频满后必须停在容量上
        let engine = MockEngine::endless(&[
            MockUnit::Video,
            MockUnit::Video,
            MockUnit::Video,
            MockUnit::Audio,
        ]);
        thread.start(Box::new(engine));
        assert!(wait_until(Duration::from_secs(2), || queues.video_len() == 4));
        for _ in 0..20 {
            assert!(queues.audio_len() <= 4);
            assert!(queues.video_len() <= 4);
            thread::sleep(Duration::from_millis(1));
        }

        // 消费视频后生产继续，音频逐渐补满
        assert!(wait_until(Duration::from_secs(2), || {
            queues.pop_video();
            queues.audio_len() == 4
        }));
        assert!(queues.video_len() <= 4);
        thread.stop();
    }

    #[test]
    fn test_end_of_input_and_failures_skipped() {
        let (mut thread, queues) = thread_with(10, true, true);
        let engine = MockEngine::scripted(&[
            MockUnit::Audio,
            MockUnit::Fail,
            MockUnit::Video,
            MockUnit::Fail,
            MockUnit::Audio,
        ]);
        thread.start(Box::new(engine));
        assert!(wait_until(Duration::from_secs(2), || queues.is_end_of_input()));
        assert_eq!(queues.audio_len(), 2);
        assert_eq!(queues.video_len(), 1);
        thread.stop();
    }

    #[test]
    fn test_stop_joins_and_closes_engine() {
        let (mut thread, _queues) = thread_with(10, true, false);
        let engine = MockEngine::endless(&[MockUnit::Audio]);
        let closed = engine.closed.clone();
        thread.start(Box::new(engine));
        thread.stop();
        assert!(!thread.is_running());
        assert!(closed.load(Ordering::SeqCst));
        // 重复 stop 不报错
        thread.stop();
    }

    #[test]
    fn test_stop_empties_queues() {
        let (mut thread, queues) = thread_with(4, true, true);
        thread.start(Box::new(MockEngine::endless(&[
            MockUnit::Audio,
            MockUnit::Video,
        ])));
        assert!(wait_until(Duration::from_secs(2), || {
            queues.audio_len() == 4 && queues.video_len() == 4
        }));
        thread.stop();
        assert_eq!(queues.audio_len(), 0);
        assert_eq!(queues.video_len(), 0);

        // 没有线程时 stop 同样保证队列为空
        queues.push_audio(Arc::new(crate::core::AudioPacket::new(
            vec![0.0; 4],
            2,
            48000,
            Duration::ZERO,
        )));
        thread.stop();
        assert_eq!(queues.audio_len(), 0);
    }

    #[test]
    fn test_stop_resets_end_of_input() {
        let (mut thread, queues) = thread_with(10, true, true);
        thread.start(Box::new(MockEngine::scripted(&[MockUnit::Audio])));
        assert!(wait_until(Duration::from_secs(2), || queues.is_end_of_input()));
        thread.stop();
        assert!(!queues.is_end_of_input());
        assert!(!queues.is_drained());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut thread, _queues) = thread_with(10, true, false);
        assert!(thread.start(Box::new(MockEngine::endless(&[MockUnit::Audio]))));
        let second = MockEngine::endless(&[MockUnit::Audio]);
        let second_closed = second.closed.clone();
        let second_reads = second.reads.clone();
        assert!(!thread.start(Box::new(second)));
        assert!(second_closed.load(Ordering::SeqCst));
        assert_eq!(second_reads.load(Ordering::SeqCst), 0);
        thread.stop();
    }

    #[test]
    fn test_disabled_stream_units_discarded() {
        let (mut thread, queues) = thread_with(3, true, true);
        thread.start(Box::new(MockEngine::endless(&[
            MockUnit::Audio,
            MockUnit::Video,
        ])));
        queues.set_enabled(StreamKind::Video, false);
        assert!(wait_until(Duration::from_secs(2), || queues.audio_len() == 3));
        assert_eq!(queues.video_len(), 0);
        thread.stop();
    }
}
