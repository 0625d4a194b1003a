use crate::core::types::PlaybackState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("找不到可播放的音频或视频流")]
    NoPlayableStream,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("输出流配置失败: {0}")]
    StreamSetupError(String),

    #[error("非法的状态切换: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PlaybackState,
        to: PlaybackState,
    },

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
