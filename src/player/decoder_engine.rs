use crate::core::{AudioPacket, Result, SessionInfo, VideoPacket};

/// 解码引擎读出的一个原始单元
#[derive(Debug)]
pub enum RawUnit<V, A> {
    Video(V),
    Audio(A),
    EndOfInput,
}

/// 解码引擎抽象接口（封装的编解码库）
///
/// 打开由具体实现的构造函数负责（例如 `FfmpegDecoderEngine::open`）。
/// 引擎只会在解码线程中被访问。
pub trait DecoderEngine: Send + 'static {
    /// 解码后的视频原始帧
    type Video: Send;
    /// 解码后的音频原始帧
    type Audio: Send;

    /// 读取并解码下一个单元
    ///
    /// 返回 Err 表示这一个单元解码失败，调用方会跳过它继续读取。
    fn read_next(&mut self) -> Result<RawUnit<Self::Video, Self::Audio>>;

    /// 转换为输出像素格式
    fn convert_video(&mut self, frame: Self::Video) -> Result<VideoPacket>;

    /// 重采样为输出采样格式
    fn resample_audio(&mut self, frame: Self::Audio) -> Result<AudioPacket>;

    /// 会话信息（流索引、时长、输出格式）
    fn session_info(&self) -> &SessionInfo;

    /// 释放解码资源，可重复调用
    fn close(&mut self);

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 解码线程每一步的产出
#[derive(Debug)]
pub enum Produced {
    Audio(AudioPacket),
    Video(VideoPacket),
    /// 该单元所属流未启用，已丢弃
    Discarded,
    /// 单个单元解码/转换失败
    Failed(String),
    EndOfInput,
}

/// 解码线程使用的对象安全接口，对任意 `DecoderEngine` 自动实现
pub trait PacketProducer: Send {
    /// 读一个单元并完成转换/重采样
    fn produce(&mut self, audio_enabled: bool, video_enabled: bool) -> Produced;

    fn session_info(&self) -> &SessionInfo;

    fn close(&mut self);

    fn description(&self) -> String;
}

impl<E: DecoderEngine> PacketProducer for E {
    fn produce(&mut self, audio_enabled: bool, video_enabled: bool) -> Produced {
        match self.read_next() {
            Ok(RawUnit::Video(frame)) if video_enabled => match self.convert_video(frame) {
                Ok(packet) => Produced::Video(packet),
                Err(e) => Produced::Failed(e.to_string()),
            },
            Ok(RawUnit::Audio(frame)) if audio_enabled => match self.resample_audio(frame) {
                Ok(packet) => Produced::Audio(packet),
                Err(e) => Produced::Failed(e.to_string()),
            },
            Ok(RawUnit::Video(_)) | Ok(RawUnit::Audio(_)) => Produced::Discarded,
            Ok(RawUnit::EndOfInput) => Produced::EndOfInput,
            Err(e) => Produced::Failed(e.to_string()),
        }
    }

    fn session_info(&self) -> &SessionInfo {
        DecoderEngine::session_info(self)
    }

    fn close(&mut self) {
        DecoderEngine::close(self)
    }

    fn description(&self) -> String {
        DecoderEngine::description(self)
    }
}
