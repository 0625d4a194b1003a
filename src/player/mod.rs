// 解码分发与播放同步

pub mod audio_playback;
pub mod data_source;
pub mod decode_thread;
pub mod decoder_engine;
pub mod library;
pub mod packet_queue;
pub mod video_playback;

#[cfg(feature = "cpal")]
pub mod audio_output;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio_playback::{
    AudioBackend, AudioChunk, AudioFeed, AudioPlayback, CallbackAudioBackend, NextBuffer,
};
pub use data_source::{DataSource, SourceHandle};
pub use decode_thread::DecodeThread;
pub use decoder_engine::{DecoderEngine, RawUnit};
pub use library::MediaLibrary;
pub use packet_queue::PacketQueues;
pub use video_playback::{
    CallbackRenderSink, ChannelRenderSink, RenderEvent, RenderSink, VideoPlayback,
};

#[cfg(feature = "cpal")]
pub use audio_output::CpalAudioBackend;
#[cfg(feature = "ffmpeg")]
pub use demuxer::FfmpegDecoderEngine;
