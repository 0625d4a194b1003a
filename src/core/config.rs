use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放引擎配置
///
/// 可以从 JSON 文件加载，缺省字段使用默认值：
/// ```json
/// { "queue_capacity": 10, "offset_correction_ms": 50 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 每路解码队列容量（包数）
    pub queue_capacity: usize,
    /// 解码线程无事可做时的休眠间隔
    pub idle_interval_ms: u64,
    /// 音频拉取时等待数据的最长时间
    pub data_wait_timeout_ms: u64,
    /// 输出延迟补偿
    pub offset_correction_ms: u64,
    pub enable_video: bool,
    pub enable_audio: bool,
    /// 音量 0.0 - 1.0
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            idle_interval_ms: 5,
            data_wait_timeout_ms: 20,
            offset_correction_ms: 50,
            enable_video: true,
            enable_audio: true,
            volume: 1.0,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件读取配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)?;
        Ok(config.normalized())
    }

    /// 修正不合法的取值
    pub fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.volume = self.volume.clamp(0.0, 1.0);
        self
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn data_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.data_wait_timeout_ms)
    }

    pub fn offset_correction(&self) -> Duration {
        Duration::from_millis(self.offset_correction_ms)
    }
}
