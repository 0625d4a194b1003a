//! 音视频解码与分发同步引擎
//!
//! 解码线程把音视频包填进两路有界队列，音频引擎按设备节奏拉取并推进时钟，
//! 视频引擎按音频时钟取出到期的帧。

pub mod core;
pub mod player;
