use super::backend::MediaBackend;
use super::event_queue::TimedEventQueue;
use super::listener::NotificationSink;
use super::session::{EventKind, PlayerEvent, PreparePhase, Session};
use crate::core::{
    log_ctx, DataSourceDesc, Flow, MediaInfo, PlaybackState, PlayerConfig, PlayerError, Result,
};
use log::{info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// API 线程、事件线程与连接线程共享的部分
struct Shared {
    /// 交给连接线程；播放器销毁后升级失败，迟到的连接结果随之丢弃
    this: Weak<Shared>,
    session: Mutex<Session>,
    /// 准备结束（完成、失败或取消）时广播
    prepared: Condvar,
}

impl Shared {
    fn dispatch(&self, event: PlayerEvent) {
        if event.kind == EventKind::AsyncPrepare {
            self.on_async_prepare(event);
            return;
        }
        let mut session = self.session.lock();
        if !session.begin_event_l(event) {
            return;
        }
        match event.kind {
            EventKind::ConnectDone => session.on_connect_done_event(),
            EventKind::Video => session.on_video_event(),
            EventKind::StreamDone => session.on_stream_done_event(),
            EventKind::Buffering => session.on_buffering_event(),
            EventKind::AudioStatus => session.on_audio_status_event(),
            EventKind::AsyncPrepare => {}
        }
        drop(session);
        self.prepared.notify_all();
    }

    /// 异步准备：打开数据源后把可能长时间阻塞的 connect 交给独立线程，
    /// 事件线程不会被卡住，被放弃的连接也不会拖住 reset 和析构
    fn on_async_prepare(&self, event: PlayerEvent) {
        let mut session = self.session.lock();
        if !session.begin_event_l(event) {
            return;
        }
        if session.flags.prepare_cancelled {
            session.abort_prepare_l(PlayerError::Cancelled);
            drop(session);
            self.prepared.notify_all();
            return;
        }
        let source = match session.begin_connect_l() {
            Ok(source) => source,
            Err(e) => {
                session.abort_prepare_l(e);
                drop(session);
                self.prepared.notify_all();
                return;
            }
        };

        let epoch = session.prepare_epoch;
        let shared = self.this.clone();
        let spawned = thread::Builder::new()
            .name("prepare-connect".to_string())
            .spawn(move || {
                // 网络握手、RTSP 会话建立……reset 通过 disconnect 打断
                let connected = source.connect();
                drop(source);
                match shared.upgrade() {
                    Some(shared) => shared.on_connect_returned(epoch, connected),
                    None => info!("{} 🗑️ 播放器已销毁，丢弃连接结果", log_ctx()),
                }
            });
        if let Err(e) = spawned {
            session.abort_prepare_l(PlayerError::ResourceExhausted(format!("无法创建连接线程: {}", e)));
            drop(session);
            self.prepared.notify_all();
        }
    }

    /// 连接线程返回：结果属于当前这轮准备时交回事件线程继续
    fn on_connect_returned(&self, epoch: u64, connected: Result<()>) {
        let mut session = self.session.lock();
        if session.state != PlaybackState::Preparing || session.prepare_epoch != epoch {
            info!("{} 🗑️ 准备已被放弃，丢弃连接结果", log_ctx());
            return;
        }
        session.connect_result = Some(connected);
        session.post_event_l(EventKind::ConnectDone, 0);
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 对外的全部操作都在这里：设置数据源、准备、播放/暂停、seek、
/// 挂起/恢复和各种查询。方法可以从任意线程调用，内部用一把会话锁串行化；
/// 解码、渲染、缓冲检查等周期性工作在独立的事件线程上执行。
pub struct PlaybackManager {
    shared: Arc<Shared>,
    queue: TimedEventQueue<PlayerEvent>,
}

impl PlaybackManager {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        listener: Arc<dyn NotificationSink>,
        config: PlayerConfig,
    ) -> Result<Self> {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        config.validate()?;

        let mut queue: TimedEventQueue<PlayerEvent> = TimedEventQueue::new();
        let handle = queue.handle();
        let shared = Arc::new_cyclic(|this: &Weak<Shared>| Shared {
            this: this.clone(),
            session: Mutex::new(Session::new(config, backend, listener, handle)),
            prepared: Condvar::new(),
        });
        let weak = Arc::downgrade(&shared);
        queue.spawn("player-events", move |event: PlayerEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(event);
            }
        })?;

        info!("{} ✅ 播放管理器创建完成", log_ctx());
        Ok(Self { shared, queue })
    }

    pub fn with_defaults(backend: Arc<dyn MediaBackend>, listener: Arc<dyn NotificationSink>) -> Result<Self> {
        Self::new(backend, listener, PlayerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.shared.session.lock()
    }

    // ==================== 数据源 ====================

    pub fn set_data_source_uri(&self, uri: &str, headers: HashMap<String, String>) -> Result<()> {
        let desc = DataSourceDesc::from_uri(uri, headers)?;
        self.lock().set_data_source_l(desc)
    }

    pub fn set_data_source_fd(&self, fd: i32, offset: i64, length: i64) -> Result<()> {
        let desc = DataSourceDesc::from_fd(fd, offset, length)?;
        self.lock().set_data_source_l(desc)
    }

    // ==================== 准备 ====================

    /// 同步准备：阻塞直到准备完成、失败或被 reset 取消
    pub fn prepare(&self) -> Result<()> {
        let mut session = self.lock();
        self.prepare_locked(&mut session)
    }

    /// 异步准备：立即返回，结果通过 Prepared / Error 通知
    pub fn prepare_async(&self) -> Result<()> {
        self.lock().prepare_async_l(true)
    }

    fn prepare_locked(&self, session: &mut MutexGuard<'_, Session>) -> Result<()> {
        if session.state.is_prepared() {
            return Ok(());
        }
        session.prepare_async_l(false)?;
        while session.state == PlaybackState::Preparing {
            self.shared.prepared.wait(session);
        }
        session.prepare_result.clone().unwrap_or(Err(PlayerError::Cancelled))
    }

    /// 取消进行中的准备并等待事件线程确认
    ///
    /// 数据源在 `prepare_cancel_timeout_us` 内没有响应 disconnect 时强制放弃，
    /// 连接线程之后返回的结果按准备轮次丢弃
    fn cancel_prepare_and_wait(&self, session: &mut MutexGuard<'_, Session>) {
        if session.state != PlaybackState::Preparing {
            return;
        }
        info!("{} ⏹️ 取消正在进行的准备", log_ctx());
        session.flags.prepare_cancelled = true;
        if let Some(source) = session.connecting.as_ref() {
            source.disconnect();
        }
        if session.prepare_phase == PreparePhase::Buffering {
            session.finish_async_prepare_l();
        }

        let timeout_us = session.config.prepare_cancel_timeout_us.max(0) as u64;
        let deadline = Instant::now() + Duration::from_micros(timeout_us);
        while session.state == PlaybackState::Preparing {
            let timed_out = self.shared.prepared.wait_until(session, deadline).timed_out();
            if timed_out && session.state == PlaybackState::Preparing {
                warn!("{} ⚠️ 数据源未响应断开，强制放弃准备", log_ctx());
                session.abort_prepare_l(PlayerError::Cancelled);
            }
        }
        // 同步 prepare 的调用方也在等这个条件
        self.shared.prepared.notify_all();
    }

    // ==================== 播放控制 ====================

    /// 开始/恢复播放；只设置了数据源时先同步准备
    pub fn play(&self) -> Result<()> {
        let mut session = self.lock();
        match session.state {
            PlaybackState::Started(_) => return Ok(()),
            PlaybackState::DataSourceSet => self.prepare_locked(&mut session)?,
            _ => {}
        }
        session.play_l()
    }

    pub fn pause(&self) -> Result<()> {
        self.lock().pause_l(false)
    }

    pub fn seek_to(&self, position_us: i64) -> Result<()> {
        let mut session = self.lock();
        if !session.state.is_prepared() {
            return Err(PlayerError::invalid_state("seekTo", session.state));
        }
        session.seek_to_l(position_us)
    }

    pub fn set_looping(&self, looping: bool) {
        self.lock().flags.looping = looping;
    }

    /// 停止播放并释放全部资源，回到 Idle
    pub fn stop(&self) {
        info!("{} ⏹️ 停止播放", log_ctx());
        self.reset();
    }

    /// 任意状态下都可调用，返回后所有解码器和数据源都已释放
    pub fn reset(&self) {
        let mut session = self.lock();
        self.reset_locked(&mut session);
    }

    fn reset_locked(&self, session: &mut MutexGuard<'_, Session>) {
        self.cancel_prepare_and_wait(session);
        session.teardown_l();
        session.suspension = None;
    }

    // ==================== 挂起 / 恢复 ====================

    /// 释放解码资源但记住会话，之后可以 `resume`
    pub fn suspend(&self) -> Result<()> {
        let mut session = self.lock();
        if session.state == PlaybackState::Idle {
            return if session.suspension.is_some() {
                Ok(())
            } else {
                Err(PlayerError::invalid_state("suspend", session.state))
            };
        }
        self.cancel_prepare_and_wait(&mut session);
        let snapshot = session.capture_snapshot_l()?;
        session.teardown_l();
        session.suspension = Some(snapshot);
        info!("{} 💤 已挂起", log_ctx());
        Ok(())
    }

    /// 从挂起快照重建会话：先显示冻结帧，再准备、seek 回原位置、按需继续播放
    pub fn resume(&self) -> Result<()> {
        let mut session = self.lock();
        if session.state != PlaybackState::Idle {
            return Err(PlayerError::invalid_state("resume", session.state));
        }
        let snapshot = session
            .suspension
            .take()
            .ok_or_else(|| PlayerError::InvalidState("没有挂起的会话".to_string()))?;
        info!("{} ▶️ 从挂起恢复: {}", log_ctx(), snapshot.source.description());

        session.set_data_source_l(snapshot.source.clone())?;
        if let Some(frame) = snapshot.frozen_frame.as_ref() {
            if let Err(e) = session.restore_frozen_frame_l(frame) {
                warn!("{} ⚠️ 冻结帧显示失败: {}", log_ctx(), e);
            }
        }

        self.prepare_locked(&mut session)?;
        if snapshot.position_us > 0 {
            session.seek_to_l(snapshot.position_us)?;
        }
        session.restore_flags_l(&snapshot.flags);
        if snapshot.flags.playing {
            session.play_l()?;
        }
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspension.is_some()
    }

    // ==================== 查询 ====================

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// 用户意图为播放且没有因缓存不足暂停
    pub fn is_playing(&self) -> bool {
        self.lock().state == PlaybackState::Started(Flow::Playing)
    }

    pub fn duration(&self) -> Result<i64> {
        let session = self.lock();
        session
            .duration_us
            .ok_or_else(|| PlayerError::InvalidState(format!("时长未知（状态 {:?}）", session.state)))
    }

    pub fn position(&self) -> Result<i64> {
        let session = self.lock();
        match session.state {
            PlaybackState::Idle | PlaybackState::DataSourceSet | PlaybackState::Preparing => Ok(0),
            _ => Ok(session.position_l()),
        }
    }

    pub fn video_dimensions(&self) -> Result<(i32, i32)> {
        let session = self.lock();
        session
            .video_format
            .map(|f| (f.display_width, f.display_height))
            .ok_or_else(|| PlayerError::InvalidState("没有视频尺寸".to_string()))
    }

    pub fn media_info(&self) -> MediaInfo {
        self.lock().media_info_l()
    }

    pub fn is_looping(&self) -> bool {
        let session = self.lock();
        session.flags.looping || session.flags.auto_looping
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        {
            let mut session = self.lock();
            self.reset_locked(&mut session);
        }
        self.queue.stop();
        info!("{} 🧹 播放管理器已销毁", log_ctx());
    }
}
