use anyhow::{Context, Result};
use log::{debug, info, warn};
use myy_playback::core::PlayerConfig;
use myy_playback::player::{
    AudioPlayback, ChannelRenderSink, DataSource, MediaLibrary, RenderEvent, VideoPlayback,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const USAGE: &str = "用法: myy_playback <媒体文件> [配置.json]";

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback 启动");

    let mut args = std::env::args().skip(1);
    let path = args.next().context(USAGE)?;
    let config = match args.next() {
        Some(config_path) => PlayerConfig::from_json_file(&config_path)
            .with_context(|| format!("读取配置失败: {}", config_path))?,
        None => PlayerConfig::default(),
    };
    debug!("播放配置: {:?}", config);

    let library = MediaLibrary::acquire().context("解码库初始化失败")?;
    let source = DataSource::new(config);
    open_source(&source, &library, &path)?;

    let audio = create_audio(&source);
    let (sink, events) = ChannelRenderSink::new();
    let video = VideoPlayback::new(&source, Box::new(sink));
    if let Some(audio) = audio.as_ref() {
        video.sync_to(audio);
    }

    source.play().context("开始播放失败")?;
    info!("▶️  开始播放: {}", path);

    let mut last_report = Instant::now();
    let mut frames = 0u64;
    while !source.is_finished() {
        video.update();

        // 模拟 UI 线程消费渲染事件
        for event in events.try_iter() {
            match event {
                RenderEvent::Create { width, height } => info!("🖼️  纹理 {}x{}", width, height),
                RenderEvent::Frame(_) => frames += 1,
                RenderEvent::Clear => debug!("纹理已清空"),
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let status = source.buffer_status();
            info!(
                "⏱️  位置 {:?}, 已渲染 {} 帧, 队列 音频 {}/{} 视频 {}/{}",
                video.clock(),
                frames,
                status.audio_packets,
                status.capacity,
                status.video_packets,
                status.capacity
            );
            last_report = Instant::now();
        }

        thread::sleep(Duration::from_millis(5));
    }

    source.stop();
    info!(
        "⏹️  播放结束: 渲染 {} 帧，跳过 {} 帧",
        video.frames_presented(),
        video.frames_skipped()
    );
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn open_source(source: &DataSource, library: &MediaLibrary, path: &str) -> Result<()> {
    source
        .open_file(library, path)
        .with_context(|| format!("无法打开 {}", path))?;
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
fn open_source(_source: &DataSource, _library: &MediaLibrary, path: &str) -> Result<()> {
    anyhow::bail!("未启用 ffmpeg 特性，无法打开 {}", path)
}

/// 没有可用的音频设备时只播放视频（按墙钟同步）
#[cfg(feature = "cpal")]
fn create_audio(source: &DataSource) -> Option<Arc<AudioPlayback>> {
    use myy_playback::player::CpalAudioBackend;

    if !source.has_audio() {
        return None;
    }
    match CpalAudioBackend::new() {
        Ok(backend) => {
            backend.set_volume(source.config().volume);
            Some(AudioPlayback::new(source, Box::new(backend)))
        }
        Err(e) => {
            warn!("⚠️  音频设备不可用，仅播放视频: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "cpal"))]
fn create_audio(_source: &DataSource) -> Option<Arc<AudioPlayback>> {
    warn!("⚠️  未启用 cpal 特性，仅播放视频");
    None
}
