use anyhow::{Context, Result};
use log::{info, warn};
use playback_engine::core::{log_ctx, PlayerConfig};
use playback_engine::player::{ChannelSink, MemoryBackend, Notification, PlaybackManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 用法: playback-engine [URI] [配置文件.json]
fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("🎬 playback-engine 演示启动");

    let mut args = std::env::args().skip(1);
    let uri = args.next().unwrap_or_else(|| "mem://3s-clip".to_string());
    let config = match args.next() {
        Some(path) => PlayerConfig::from_json_file(&path).with_context(|| format!("加载配置失败: {}", path))?,
        None => PlayerConfig::default(),
    };

    let backend = Arc::new(MemoryBackend::new());
    let (sink, notifications) = ChannelSink::new();
    let player = PlaybackManager::new(backend.clone(), Arc::new(sink), config)?;

    // 通知打印线程：通道在播放器销毁后关闭，线程随之退出
    let printer = thread::Builder::new()
        .name("notifications".to_string())
        .spawn(move || {
            for notification in notifications.iter() {
                let (what, ext1, ext2) = notification.params();
                info!("{} 📣 {:?} ({}, {}, {})", log_ctx(), notification, what, ext1, ext2);
                if notification == Notification::PlaybackComplete {
                    break;
                }
            }
        })
        .context("无法创建通知线程")?;

    player.set_data_source_uri(&uri, HashMap::new())?;
    player.prepare()?;
    let info = player.media_info();
    info!("{} 📊 {:?}", log_ctx(), info);

    player.play()?;
    thread::sleep(Duration::from_millis(800));

    player.pause()?;
    info!("{} ⏸️ 暂停于 {}us", log_ctx(), player.position()?);
    player.seek_to(info.duration_us.unwrap_or(0) / 2)?;
    thread::sleep(Duration::from_millis(100));

    player.suspend()?;
    info!("{} 💤 已挂起，释放后存活实例: {}", log_ctx(), backend.live_instances());
    player.resume()?;
    info!("{} ▶️ 已恢复，位置 {}us", log_ctx(), player.position()?);

    player.play()?;
    while player.is_playing() {
        thread::sleep(Duration::from_millis(100));
    }

    let rendered = backend.take_rendered();
    info!("{} 🖼️ 共渲染 {} 帧", log_ctx(), rendered.len());

    drop(player);
    if printer.join().is_err() {
        warn!("{} ⚠️ 通知线程异常退出", log_ctx());
    }
    info!("👋 演示结束");
    Ok(())
}
