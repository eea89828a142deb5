use super::backend::MediaBackend;
use super::buffering::{BufferingAction, BufferingController, BufferingPhase};
use super::event_queue::{EventId, QueueHandle};
use super::listener::{InfoKind, Notification, NotificationSink};
use super::seek::SeekState;
use super::source::{AudioPlayer, DataSource, Decoder, Extractor, ReadOptions, ReadOutcome, Renderer, TrackMeta};
use super::suspend::SuspensionSnapshot;
use super::sync::{ClockKind, ClockSynchronizer, FrameVerdict};
use crate::core::{
    log_ctx, DataSourceDesc, DriftCorrectedClock, Flow, FrozenFrame, MediaBuffer, MediaInfo, PixelFormat,
    PlaybackState, PlayerConfig, PlayerError, Result, StreamProtocol, SystemTimeSource, TimeSource, VideoFormat,
};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 连续损坏帧超过该数量时先让出事件线程
const MAX_CORRUPT_READS: u32 = 16;

/// 事件种类；每种事件同一时刻最多有一个在队列中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EventKind {
    AsyncPrepare,
    /// 连接线程已返回，结果暂存在 `Session::connect_result`
    ConnectDone,
    Video,
    StreamDone,
    Buffering,
    AudioStatus,
}

impl EventKind {
    const COUNT: usize = 6;
    const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::AsyncPrepare,
        EventKind::ConnectDone,
        EventKind::Video,
        EventKind::StreamDone,
        EventKind::Buffering,
        EventKind::AudioStatus,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::AsyncPrepare => 0,
            EventKind::ConnectDone => 1,
            EventKind::Video => 2,
            EventKind::StreamDone => 3,
            EventKind::Buffering => 4,
            EventKind::AudioStatus => 5,
        }
    }
}

/// 队列里流转的事件：种类 + 投递时的代数
///
/// 取消时代数加一，已出队但尚未拿到锁的旧事件据此被识别并丢弃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PlayerEvent {
    pub kind: EventKind,
    pub generation: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct EventSlot {
    id: Option<EventId>,
    generation: u64,
}

/// 异步准备所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PreparePhase {
    Idle,
    /// 连接线程正在（不持锁）连接数据源
    Connecting,
    /// 已连接，等待起播缓存
    Buffering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct SessionFlags {
    pub looping: bool,
    pub auto_looping: bool,
    pub audio_eos: bool,
    pub video_eos: bool,
    pub not_first_play: bool,
    pub first_frame_pending: bool,
    pub prepare_cancelled: bool,
    pub async_prepare: bool,
}

/// 播放会话
///
/// 所有字段都由 `PlaybackManager` 的会话锁保护；以 `_l` 结尾的方法
/// 要求调用方已持有该锁。事件处理函数在事件线程上执行，同样先加锁。
pub(super) struct Session {
    pub config: PlayerConfig,
    pub backend: Arc<dyn MediaBackend>,
    listener: Arc<dyn NotificationSink>,
    queue: QueueHandle<PlayerEvent>,
    slots: [EventSlot; EventKind::COUNT],
    system_clock: SystemTimeSource,
    drift_clock: DriftCorrectedClock,

    pub state: PlaybackState,
    pub flags: SessionFlags,
    pub prepare_phase: PreparePhase,
    pub prepare_epoch: u64,
    pub prepare_result: Option<Result<()>>,
    /// 本轮准备的连接结果，等待 ConnectDone 事件处理
    pub connect_result: Option<Result<()>>,

    pub source_desc: Option<DataSourceDesc>,
    pub connecting: Option<Arc<dyn DataSource>>,
    pub source: Option<Arc<dyn DataSource>>,
    extractor: Option<Box<dyn Extractor>>,
    pub seekable: bool,
    live: bool,
    pub duration_us: Option<i64>,
    bitrate: Option<i64>,
    video_meta: Option<TrackMeta>,
    audio_meta: Option<TrackMeta>,

    pub video_decoder: Option<Box<dyn Decoder>>,
    pub audio_decoder: Option<Box<dyn Decoder>>,
    pub audio_player: Option<Box<dyn AudioPlayer>>,
    pub renderer: Option<Box<dyn Renderer>>,
    pub renderer_is_local: bool,
    pub video_format: Option<VideoFormat>,
    pub held_frame: Option<MediaBuffer>,
    pub last_rendered: Option<MediaBuffer>,
    pub video_time_us: Option<i64>,
    last_position_us: i64,
    frames_rendered: u64,

    pub buffering: BufferingController,
    pub sync: ClockSynchronizer,
    pub seek: SeekState,
    pub watch_audio_seek: bool,
    pub watch_audio_eos: bool,
    stream_done: Option<(TrackKind, PlayerError)>,

    pub suspension: Option<SuspensionSnapshot>,
    pub pending_redisplay: Option<FrozenFrame>,
}

impl Session {
    pub fn new(
        config: PlayerConfig,
        backend: Arc<dyn MediaBackend>,
        listener: Arc<dyn NotificationSink>,
        queue: QueueHandle<PlayerEvent>,
    ) -> Self {
        let buffering = BufferingController::new(&config);
        let sync = ClockSynchronizer::new(&config);
        let drift_clock = DriftCorrectedClock::new(config.drift_max_step_us);
        Self {
            config,
            backend,
            listener,
            queue,
            slots: [EventSlot::default(); EventKind::COUNT],
            system_clock: SystemTimeSource::new(),
            drift_clock,
            state: PlaybackState::Idle,
            flags: SessionFlags::default(),
            prepare_phase: PreparePhase::Idle,
            prepare_epoch: 0,
            prepare_result: None,
            connect_result: None,
            source_desc: None,
            connecting: None,
            source: None,
            extractor: None,
            seekable: false,
            live: false,
            duration_us: None,
            bitrate: None,
            video_meta: None,
            audio_meta: None,
            video_decoder: None,
            audio_decoder: None,
            audio_player: None,
            renderer: None,
            renderer_is_local: false,
            video_format: None,
            held_frame: None,
            last_rendered: None,
            video_time_us: None,
            last_position_us: 0,
            frames_rendered: 0,
            buffering,
            sync,
            seek: SeekState::default(),
            watch_audio_seek: false,
            watch_audio_eos: false,
            stream_done: None,
            suspension: None,
            pending_redisplay: None,
        }
    }

    // ==================== 事件投递 ====================

    /// 投递事件；同种事件已在队列中时什么也不做
    pub fn post_event_l(&mut self, kind: EventKind, delay_us: i64) {
        let slot = &mut self.slots[kind.index()];
        if slot.id.is_some() {
            return;
        }
        slot.generation += 1;
        let event = PlayerEvent {
            kind,
            generation: slot.generation,
        };
        slot.id = Some(self.queue.post_with_delay(event, delay_us));
    }

    /// 取消事件；重复取消无副作用
    pub fn cancel_event_l(&mut self, kind: EventKind) {
        let slot = &mut self.slots[kind.index()];
        slot.generation += 1;
        if let Some(id) = slot.id.take() {
            self.queue.cancel(id);
        }
    }

    /// 事件出队后、执行前调用：过期事件返回 false
    pub fn begin_event_l(&mut self, event: PlayerEvent) -> bool {
        let slot = &mut self.slots[event.kind.index()];
        if slot.id.is_none() || slot.generation != event.generation {
            debug!("{} 忽略已取消的事件: {:?}", log_ctx(), event);
            return false;
        }
        slot.id = None;
        true
    }

    fn cancel_player_events_l(&mut self, keep_buffering: bool) {
        self.cancel_event_l(EventKind::Video);
        self.cancel_event_l(EventKind::StreamDone);
        self.cancel_event_l(EventKind::AudioStatus);
        if !keep_buffering {
            self.cancel_event_l(EventKind::Buffering);
        }
    }

    pub fn notify_l(&self, notification: Notification) {
        debug!("{} 📣 通知: {:?}", log_ctx(), notification);
        self.listener.notify(notification);
    }

    // ==================== 数据源与准备 ====================

    pub fn set_data_source_l(&mut self, desc: DataSourceDesc) -> Result<()> {
        if self.state != PlaybackState::Idle {
            return Err(PlayerError::invalid_state("setDataSource", self.state));
        }
        info!("{} 📂 设置数据源: {}", log_ctx(), desc.description());
        self.source_desc = Some(desc);
        self.state = PlaybackState::DataSourceSet;
        Ok(())
    }

    /// 进入 Preparing 并投递异步准备事件
    pub fn prepare_async_l(&mut self, is_async: bool) -> Result<()> {
        match self.state {
            PlaybackState::DataSourceSet => {}
            PlaybackState::Preparing => {
                return Err(PlayerError::InvalidState("已经在准备中".to_string()));
            }
            other => return Err(PlayerError::invalid_state("prepare", other)),
        }
        info!("{} 🔧 开始准备（{}）", log_ctx(), if is_async { "异步" } else { "同步" });
        self.state = PlaybackState::Preparing;
        self.prepare_phase = PreparePhase::Idle;
        self.prepare_epoch += 1;
        self.prepare_result = None;
        self.connect_result = None;
        self.flags.prepare_cancelled = false;
        self.flags.async_prepare = is_async;
        self.post_event_l(EventKind::AsyncPrepare, 0);
        Ok(())
    }

    /// 准备第一步：构造数据源，记录为"连接中"以便 reset 时断开
    pub fn begin_connect_l(&mut self) -> Result<Arc<dyn DataSource>> {
        self.prepare_phase = PreparePhase::Connecting;
        let desc = self
            .source_desc
            .clone()
            .ok_or_else(|| PlayerError::InvalidState("没有设置数据源".to_string()))?;
        info!("{} 🌐 打开数据源: {}", log_ctx(), desc.description());
        let source = self.backend.open_source(&desc)?;
        self.connecting = Some(source.clone());
        Ok(source)
    }

    /// 连接返回后（重新持锁）继续准备
    fn complete_connect_l(&mut self, connected: Result<()>) -> Result<()> {
        let source = self.connecting.take();
        if self.flags.prepare_cancelled {
            return Err(PlayerError::Cancelled);
        }
        connected?;
        let source = source.ok_or(PlayerError::Cancelled)?;
        info!("{} ✅ 数据源已连接: {}", log_ctx(), source.description());
        self.source = Some(source);
        self.init_media_l()
    }

    /// 连接线程交回结果后，在事件线程上继续准备
    pub fn on_connect_done_event(&mut self) {
        if self.state != PlaybackState::Preparing {
            return;
        }
        let Some(connected) = self.connect_result.take() else {
            return;
        };
        match self.complete_connect_l(connected) {
            Ok(()) => self.start_prefetch_or_finish_l(),
            Err(e) => self.abort_prepare_l(e),
        }
    }

    fn init_media_l(&mut self) -> Result<()> {
        let source = self.source.clone().ok_or(PlayerError::Cancelled)?;
        let mut extractor = self.backend.create_extractor(source.clone())?;

        let protocol = self
            .source_desc
            .as_ref()
            .map(|d| d.protocol())
            .unwrap_or(StreamProtocol::File);
        // 实时与否、能否 seek 由数据源和解封装器决定；协议只决定 RTP 的到达即渲染
        self.live = source.is_live();
        self.sync.set_realtime(protocol == StreamProtocol::RTP);
        self.seekable = extractor.is_seekable() && !self.live;

        let mut bitrates = Vec::new();
        let mut duration_us: Option<i64> = None;
        let mut video = None;
        let mut audio = None;
        for index in 0..extractor.count_tracks() {
            let meta = extractor.track_meta(index)?;
            bitrates.push(meta.bitrate);
            if let Some(d) = meta.duration_us {
                duration_us = Some(duration_us.map_or(d, |cur| cur.max(d)));
            }
            if meta.auto_loop {
                self.flags.auto_looping = true;
            }
            if meta.is_video() && video.is_none() {
                video = Some((index, meta));
            } else if meta.is_audio() && audio.is_none() {
                audio = Some((index, meta));
            }
        }
        if video.is_none() && audio.is_none() {
            return Err(PlayerError::UnknownFormat("没有可播放的音视频轨道".to_string()));
        }

        self.duration_us = duration_us;
        self.bitrate = BufferingController::estimate_bitrate(&bitrates, source.size(), duration_us);

        // 单条轨道失败不致命，只要还有另一条轨道可以播放
        let mut first_error = None;
        if let Some((index, meta)) = video {
            if let Err(e) = self.init_video_decoder_l(extractor.as_mut(), index, meta) {
                warn!("{} ⚠️ 视频解码器初始化失败: {}", log_ctx(), e);
                first_error.get_or_insert(e);
            }
        }
        if let Some((index, meta)) = audio {
            if let Err(e) = self.init_audio_decoder_l(extractor.as_mut(), index, meta) {
                warn!("{} ⚠️ 音频解码器初始化失败: {}", log_ctx(), e);
                first_error.get_or_insert(e);
            }
        }
        if self.video_decoder.is_none() && self.audio_decoder.is_none() {
            return Err(first_error
                .unwrap_or_else(|| PlayerError::DecoderInitFailed("没有可用的解码器".to_string())));
        }

        self.extractor = Some(extractor);
        info!(
            "{} 📊 媒体信息: 时长={:?}us 码率={:?} 视频={} 音频={} 可seek={} 实时={}",
            log_ctx(),
            self.duration_us,
            self.bitrate,
            self.video_decoder.is_some(),
            self.audio_decoder.is_some(),
            self.seekable,
            self.live
        );
        Ok(())
    }

    fn init_video_decoder_l(&mut self, extractor: &mut dyn Extractor, index: usize, meta: TrackMeta) -> Result<()> {
        let track = extractor.track(index)?;
        let mut decoder = self
            .backend
            .create_decoder(track, &meta)
            .map_err(as_decoder_init)?;
        decoder.start().map_err(as_decoder_init)?;

        let format = decoder.output_format().or_else(|| match (meta.width, meta.height) {
            (Some(w), Some(h)) => Some(VideoFormat::new(PixelFormat::YUV420P, w, h)),
            _ => None,
        });
        if let Some(format) = format {
            info!("{} 🎬 视频: {}x{} ({})", log_ctx(), format.width, format.height, meta.mime);
            self.notify_l(Notification::SetVideoSize {
                width: format.display_width,
                height: format.display_height,
            });
        }
        self.video_format = format;
        self.video_decoder = Some(decoder);
        self.video_meta = Some(meta);
        Ok(())
    }

    fn init_audio_decoder_l(&mut self, extractor: &mut dyn Extractor, index: usize, meta: TrackMeta) -> Result<()> {
        let track = extractor.track(index)?;
        let mut decoder = self
            .backend
            .create_decoder(track, &meta)
            .map_err(as_decoder_init)?;
        decoder.start().map_err(as_decoder_init)?;
        info!("{} 🔊 音频: {}", log_ctx(), meta.mime);
        self.audio_decoder = Some(decoder);
        self.audio_meta = Some(meta);
        Ok(())
    }

    /// 流式数据源先等起播缓存，其它直接完成准备
    pub fn start_prefetch_or_finish_l(&mut self) {
        if self.is_streaming_l() {
            info!("{} ⏳ 等待起播缓存...", log_ctx());
            self.prepare_phase = PreparePhase::Buffering;
            self.post_event_l(EventKind::Buffering, 0);
        } else {
            self.finish_async_prepare_l();
        }
    }

    pub fn finish_async_prepare_l(&mut self) {
        if self.state != PlaybackState::Preparing {
            return;
        }
        if self.flags.prepare_cancelled {
            self.abort_prepare_l(PlayerError::Cancelled);
            return;
        }
        self.state = PlaybackState::Prepared;
        self.prepare_phase = PreparePhase::Idle;
        self.prepare_result = Some(Ok(()));
        self.flags.async_prepare = false;
        info!("{} ✅ 准备完成", log_ctx());
        self.notify_l(Notification::Prepared);
    }

    /// 准备失败或被取消；取消不发通知，同步准备的错误由调用方直接拿到
    pub fn abort_prepare_l(&mut self, err: PlayerError) {
        if self.state != PlaybackState::Preparing {
            return;
        }
        let cancelled = err == PlayerError::Cancelled;
        if cancelled {
            info!("{} ⏹️ 准备已取消", log_ctx());
        } else {
            error!("{} ❌ 准备失败: {}", log_ctx(), err);
            if self.flags.async_prepare {
                self.notify_l(Notification::error(&err));
            }
        }
        self.connecting = None;
        self.connect_result = None;
        self.state = if cancelled {
            PlaybackState::DataSourceSet
        } else {
            PlaybackState::Error
        };
        self.prepare_phase = PreparePhase::Idle;
        self.prepare_result = Some(Err(err));
        self.flags.prepare_cancelled = false;
        self.flags.async_prepare = false;
    }

    pub fn is_streaming_l(&self) -> bool {
        self.source
            .as_ref()
            .map(|s| s.cache_status().is_some())
            .unwrap_or(false)
    }

    // ==================== 播放控制 ====================

    pub fn play_l(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Started(_) => return Ok(()),
            PlaybackState::Prepared | PlaybackState::Paused => {}
            other => return Err(PlayerError::invalid_state("play", other)),
        }

        let first_play = !self.flags.not_first_play;
        info!("{} ▶️ 开始播放{}", log_ctx(), if first_play { "（首次）" } else { "" });

        self.start_audio_l()?;
        self.state = PlaybackState::Started(Flow::Playing);
        self.flags.not_first_play = true;
        if first_play {
            self.flags.first_frame_pending = true;
        }
        self.seek.preview = false;
        self.buffering.clear_underrun();

        if self.at_eos_l() {
            // 播完后再次播放从头开始
            self.seek_to_l(0)?;
        }

        self.reanchor_on_resume_l();

        if self.audio_player.is_some() {
            self.watch_audio_eos = true;
            self.post_event_l(EventKind::AudioStatus, 0);
        }

        if self.is_streaming_l() {
            self.check_buffering_l();
            let interval = self.config.buffering_check_interval_us;
            self.post_event_l(EventKind::Buffering, interval);
        }

        if self.state == PlaybackState::Started(Flow::Playing) && self.video_decoder.is_some() {
            self.post_event_l(EventKind::Video, 0);
        }
        Ok(())
    }

    /// 首次播放时创建音频播放器，之后只是恢复
    fn start_audio_l(&mut self) -> Result<()> {
        let video_seeking = self.seek.seeking && self.video_decoder.is_some();
        if let Some(player) = self.audio_player.as_mut() {
            // 视频 seek 未完成时音频保持暂停，由 seek 完成时恢复
            if !video_seeking {
                player.resume();
            }
            return Ok(());
        }
        let Some(decoder) = self.audio_decoder.take() else {
            return Ok(());
        };
        let meta = self.audio_meta.clone().unwrap_or_default();
        let mut player = self.backend.create_audio_player(decoder, &meta)?;
        player.start(true)?;

        if !self.seek.seeking && self.video_decoder.is_some() {
            if let Some(video_time) = self.video_time_us.filter(|t| *t > 0) {
                player.seek_to(video_time)?;
            }
        }
        if video_seeking {
            player.pause(false);
        }
        self.audio_player = Some(player);
        self.seek_audio_if_necessary_l()
    }

    pub fn pause_l(&mut self, at_eos: bool) -> Result<()> {
        match self.state {
            PlaybackState::Paused => return Ok(()),
            PlaybackState::Started(_) => {}
            other => return Err(PlayerError::invalid_state("pause", other)),
        }
        info!("{} ⏸️ 暂停{}", log_ctx(), if at_eos { "（播放结束）" } else { "" });

        self.cancel_player_events_l(true);
        if let Some(player) = self.audio_player.as_mut() {
            player.pause(at_eos);
        }
        self.buffering.clear_underrun();
        self.last_position_us = self.position_l();
        self.state = PlaybackState::Paused;

        // 暂停打断了进行中的 seek：通知完成，并预览目标帧
        if self.seek.seeking && !self.seek.notification_sent {
            self.seek.notification_sent = true;
            self.notify_l(Notification::SeekComplete);
            if self.video_decoder.is_some() {
                self.seek.preview = true;
                self.post_event_l(EventKind::Video, 0);
            }
        }
        Ok(())
    }

    pub fn at_eos_l(&self) -> bool {
        let has_audio = self.audio_player.is_some() || self.audio_decoder.is_some();
        let video_done = self.video_decoder.is_none() || self.flags.video_eos;
        let audio_done = !has_audio || self.flags.audio_eos;
        (self.flags.video_eos || self.flags.audio_eos) && video_done && audio_done
    }

    fn enter_underrun_l(&mut self) {
        if self.state != PlaybackState::Started(Flow::Playing) {
            return;
        }
        self.state = PlaybackState::Started(Flow::Underrun);
        self.cancel_event_l(EventKind::Video);
        if let Some(player) = self.audio_player.as_mut() {
            player.pause(false);
        }
        self.notify_l(Notification::Info(InfoKind::BufferingStart));
    }

    pub fn leave_underrun_l(&mut self) {
        if self.state != PlaybackState::Started(Flow::Underrun) {
            return;
        }
        self.state = PlaybackState::Started(Flow::Playing);
        self.buffering.clear_underrun();
        let video_seeking = self.seek.seeking && self.video_decoder.is_some();
        if let Some(player) = self.audio_player.as_mut() {
            if !video_seeking {
                player.resume();
            }
        }
        self.reanchor_on_resume_l();
        if self.video_decoder.is_some() {
            self.post_event_l(EventKind::Video, 0);
        }
        self.notify_l(Notification::Info(InfoKind::BufferingEnd));
    }

    /// 运行中出错：通知并进入 Error，资源保留到 reset
    fn fail_playback_l(&mut self, err: PlayerError) {
        error!("{} ❌ 播放出错: {}", log_ctx(), err);
        self.cancel_player_events_l(false);
        if let Some(player) = self.audio_player.as_mut() {
            player.pause(false);
        }
        self.state = PlaybackState::Error;
        self.notify_l(Notification::error(&err));
    }

    // ==================== 时钟 ====================

    fn current_clock_kind_l(&self) -> ClockKind {
        ClockKind::select(
            self.audio_player.is_some(),
            self.flags.audio_eos,
            self.config.drift_correction,
        )
    }

    /// 系统时钟在暂停期间继续走，恢复后必须重新锚定
    fn reanchor_on_resume_l(&mut self) {
        if self.current_clock_kind_l() != ClockKind::Audio {
            self.sync.invalidate_anchor();
        }
    }

    fn clock_now_l(&self, kind: ClockKind) -> i64 {
        let audio_now = self.audio_player.as_ref().map(|p| p.real_time_us());
        match (kind, audio_now) {
            (ClockKind::Audio, Some(now)) => now,
            (ClockKind::DriftCorrected, Some(audio_now)) => {
                let current = self.drift_clock.real_time_us();
                if self.sync.needs_anchor()
                    || (audio_now - current).abs() > self.config.frame_lateness_drop_threshold_us
                {
                    self.drift_clock.align_to(audio_now);
                } else {
                    self.drift_clock.nudge_toward(audio_now);
                }
                self.drift_clock.real_time_us()
            }
            _ => self.system_clock.real_time_us(),
        }
    }

    // ==================== 事件处理 ====================

    pub fn on_video_event(&mut self) {
        let preview = self.seek.preview && !self.state.is_started();
        if self.state != PlaybackState::Started(Flow::Playing) && !preview {
            return;
        }
        if self.video_decoder.is_none() {
            return;
        }

        if self.seek.seeking {
            if let Some(stale) = self.held_frame.take() {
                debug!("{} 丢弃 seek 前保留的帧: {}us", log_ctx(), stale.timestamp_us);
            }
        }

        let buffer = match self.held_frame.take() {
            Some(buffer) => buffer,
            None => match self.read_video_frame_l() {
                Some(buffer) => buffer,
                None => return,
            },
        };
        let timestamp_us = buffer.timestamp_us;
        self.video_time_us = Some(timestamp_us);
        self.finish_seek_if_necessary_l(timestamp_us);

        if preview {
            self.seek.preview = false;
            if let Err(e) = self.render_l(buffer) {
                self.fail_playback_l(e);
            }
            return;
        }

        let kind = self.current_clock_kind_l();
        self.sync.observe_clock(kind);
        if kind.follows_audio() {
            let mapping = self.audio_player.as_ref().and_then(|p| p.media_time_mapping());
            if let Some((real_time_us, media_time_us)) = mapping {
                self.sync.apply_audio_mapping(real_time_us, media_time_us);
            }
        }
        let now_us = self.clock_now_l(kind);

        match self.sync.evaluate(now_us, timestamp_us) {
            FrameVerdict::Drop { .. } => {
                self.post_event_l(EventKind::Video, 0);
            }
            FrameVerdict::Early { recheck_after_us, .. } => {
                self.held_frame = Some(buffer);
                self.post_event_l(EventKind::Video, recheck_after_us);
            }
            FrameVerdict::Render { lateness_us } => {
                if lateness_us.abs() > self.config.frame_early_reschedule_us {
                    debug!("{} 帧 {}us 偏差 {}us", log_ctx(), timestamp_us, lateness_us);
                }
                if let Err(e) = self.render_l(buffer) {
                    self.fail_playback_l(e);
                    return;
                }
                let interval = self.config.video_event_interval_us;
                self.post_event_l(EventKind::Video, interval);
            }
        }
    }

    /// 从视频解码器读一帧；流结束或出错时投递结束事件并返回 None
    fn read_video_frame_l(&mut self) -> Option<MediaBuffer> {
        let mut options = if self.seek.seeking {
            ReadOptions::seek_to(self.seek.target_us)
        } else {
            ReadOptions::default()
        };
        let mut corrupt_reads = 0;
        loop {
            let outcome = match self.video_decoder.as_mut() {
                Some(decoder) => decoder.read(&options),
                None => return None,
            };
            match outcome {
                Ok(ReadOutcome::Buffer(buffer)) => {
                    options = ReadOptions::default();
                    if buffer.is_empty() {
                        continue;
                    }
                    return Some(buffer);
                }
                Ok(ReadOutcome::Discontinuity) => {
                    info!("{} 🔀 码流不连续，重建视频解码器", log_ctx());
                    if let Err(e) = self.reinit_video_decoder_l() {
                        self.video_stream_done_l(Some(e));
                        return None;
                    }
                }
                Ok(ReadOutcome::EndOfStream) => {
                    info!("{} 🏁 视频流结束", log_ctx());
                    if self.seek.seeking {
                        // seek 到末尾之后：没有帧可显示，直接完成 seek
                        let target = self.seek.target_us;
                        self.finish_seek_if_necessary_l(target);
                    }
                    self.video_stream_done_l(None);
                    return None;
                }
                Err(e) if e.is_recoverable() => {
                    corrupt_reads += 1;
                    warn!("{} ⚠️ 跳过损坏的视频帧: {}", log_ctx(), e);
                    if corrupt_reads >= MAX_CORRUPT_READS {
                        self.post_event_l(EventKind::Video, 0);
                        return None;
                    }
                }
                Err(e) => {
                    self.video_stream_done_l(Some(e));
                    return None;
                }
            }
        }
    }

    fn video_stream_done_l(&mut self, err: Option<PlayerError>) {
        self.flags.video_eos = true;
        if let Some(e) = err {
            error!("{} ❌ 视频解码出错: {}", log_ctx(), e);
            self.stream_done = Some((TrackKind::Video, e));
        }
        self.post_event_l(EventKind::StreamDone, 0);
    }

    /// 码流不连续：停掉旧解码器，用同一条轨道重建
    fn reinit_video_decoder_l(&mut self) -> Result<()> {
        let meta = self
            .video_meta
            .clone()
            .ok_or_else(|| PlayerError::InvalidState("没有视频轨道".to_string()))?;
        let Some(mut old) = self.video_decoder.take() else {
            return Err(PlayerError::InvalidState("没有视频解码器".to_string()));
        };
        old.stop();
        let track = old.into_track();
        let mut decoder = self
            .backend
            .create_decoder(track, &meta)
            .map_err(as_decoder_init)?;
        decoder.start().map_err(as_decoder_init)?;

        if let Some(format) = decoder.output_format() {
            if self.video_format != Some(format) {
                info!("{} 📐 视频格式变化: {}x{}", log_ctx(), format.width, format.height);
                self.video_format = Some(format);
                self.renderer = None;
                self.notify_l(Notification::SetVideoSize {
                    width: format.display_width,
                    height: format.display_height,
                });
            }
        }
        self.video_decoder = Some(decoder);
        Ok(())
    }

    fn render_l(&mut self, buffer: MediaBuffer) -> Result<()> {
        if self.renderer.is_none() || self.renderer_is_local {
            let format = self
                .video_format
                .ok_or_else(|| PlayerError::DecoderInitFailed("视频输出格式未知".to_string()))?;
            self.renderer = Some(self.backend.create_renderer(&format)?);
            self.renderer_is_local = false;
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&buffer);
        }

        self.frames_rendered += 1;
        if self.flags.first_frame_pending {
            self.flags.first_frame_pending = false;
            info!("{} 🖼️ 首帧渲染: PTS={}us", log_ctx(), buffer.timestamp_us);
        } else if self.frames_rendered % 300 == 0 {
            debug!(
                "{} 🖼️ 已渲染 {} 帧（丢弃 {}），当前 PTS={}us",
                log_ctx(),
                self.frames_rendered,
                self.sync.dropped_frames(),
                buffer.timestamp_us
            );
        }
        self.pending_redisplay = None;
        self.last_position_us = buffer.timestamp_us;
        self.last_rendered = Some(buffer);
        Ok(())
    }

    pub fn on_stream_done_event(&mut self) {
        if let Some((track, err)) = self.stream_done.take() {
            let other_alive = match track {
                TrackKind::Video => {
                    (self.audio_player.is_some() || self.audio_decoder.is_some()) && !self.flags.audio_eos
                }
                TrackKind::Audio => self.video_decoder.is_some() && !self.flags.video_eos,
            };
            if !other_alive {
                self.fail_playback_l(err);
                return;
            }
            warn!("{} ⚠️ {:?} 轨道出错（{}），继续播放另一条轨道", log_ctx(), track, err);
        }

        if !self.at_eos_l() {
            return;
        }

        if (self.flags.looping || self.flags.auto_looping) && self.seekable {
            info!("{} 🔁 循环播放，回到开头", log_ctx());
            if let Err(e) = self.seek_to_l(0) {
                self.fail_playback_l(e);
            }
            return;
        }

        info!("{} 🏁 播放完成", log_ctx());
        self.notify_l(Notification::PlaybackComplete);
        if let Err(e) = self.pause_l(true) {
            debug!("{} 播放完成时无需暂停: {}", log_ctx(), e);
        }
    }

    /// 执行一次缓冲检查（定时事件和 play 时调用）
    pub fn check_buffering_l(&mut self) {
        let Some(status) = self.source.as_ref().and_then(|s| s.cache_status()) else {
            return;
        };
        let phase = match self.state {
            PlaybackState::Preparing if self.prepare_phase == PreparePhase::Buffering => {
                BufferingPhase::Preparing
            }
            PlaybackState::Started(_) => BufferingPhase::Started,
            _ => BufferingPhase::Inactive,
        };
        let decision = self.buffering.evaluate(phase, &status, self.bitrate, self.live);
        match decision.action {
            BufferingAction::EnterUnderrun => self.enter_underrun_l(),
            BufferingAction::LeaveUnderrun => self.leave_underrun_l(),
            BufferingAction::FinishPrepare => self.finish_async_prepare_l(),
            BufferingAction::None => {}
        }
        if let Some(percentage) = decision.report_percentage {
            self.notify_l(Notification::BufferingUpdate(percentage));
        }
    }

    pub fn on_buffering_event(&mut self) {
        match self.state {
            PlaybackState::Idle | PlaybackState::DataSourceSet | PlaybackState::Error => return,
            _ => {}
        }
        self.check_buffering_l();
        if matches!(self.state, PlaybackState::Idle | PlaybackState::DataSourceSet | PlaybackState::Error) {
            return;
        }
        let interval = self.config.buffering_check_interval_us;
        self.post_event_l(EventKind::Buffering, interval);
    }

    /// 轮询音频播放器：seek 是否完成、是否到达末尾
    pub fn on_audio_status_event(&mut self) {
        let (seeking, eos) = match self.audio_player.as_ref() {
            Some(player) => (player.is_seeking(), player.reached_eos()),
            None => return,
        };

        if self.watch_audio_seek && !seeking {
            self.watch_audio_seek = false;
            if self.video_decoder.is_none() {
                self.seek.seeking = false;
            }
            if !self.seek.notification_sent {
                self.seek.notification_sent = true;
                self.notify_l(Notification::SeekComplete);
            }
        }

        if self.watch_audio_eos {
            if let Some(status) = eos {
                info!("{} 🏁 音频流结束", log_ctx());
                self.watch_audio_eos = false;
                self.flags.audio_eos = true;
                if let Err(e) = status {
                    error!("{} ❌ 音频播放出错: {}", log_ctx(), e);
                    self.stream_done = Some((TrackKind::Audio, e));
                }
                self.post_event_l(EventKind::StreamDone, 0);
            }
        }

        if self.watch_audio_seek || (self.watch_audio_eos && self.state.is_started()) {
            let interval = self.config.audio_status_check_interval_us;
            self.post_event_l(EventKind::AudioStatus, interval);
        }
    }

    // ==================== 查询 ====================

    /// 当前位置：seek 中返回目标，否则视频时间优先，其次音频时间
    pub fn position_l(&self) -> i64 {
        if self.seek.seeking {
            return self.seek.target_us;
        }
        if self.video_decoder.is_some() {
            if let Some(time_us) = self.video_time_us {
                return time_us;
            }
        }
        if let Some(player) = self.audio_player.as_ref() {
            return player.media_time_us();
        }
        self.last_position_us
    }

    pub fn media_info_l(&self) -> MediaInfo {
        let (width, height) = self
            .video_format
            .map(|f| (f.display_width, f.display_height))
            .unwrap_or((0, 0));
        MediaInfo {
            duration_us: self.duration_us,
            width,
            height,
            has_audio: self.audio_player.is_some() || self.audio_decoder.is_some(),
            has_video: self.video_decoder.is_some(),
            bitrate: self.bitrate,
            seekable: self.seekable,
        }
    }

    // ==================== 释放 ====================

    /// 释放会话的全部资源回到 Idle；挂起快照和准备结果由调用方处理
    pub fn teardown_l(&mut self) {
        for kind in EventKind::ALL {
            self.cancel_event_l(kind);
        }

        if let Some(mut player) = self.audio_player.take() {
            player.stop();
        }
        if let Some(mut decoder) = self.audio_decoder.take() {
            decoder.stop();
        }
        if let Some(mut decoder) = self.video_decoder.take() {
            decoder.stop();
        }
        if self.frames_rendered > 0 {
            info!(
                "{} 📊 本次会话渲染 {} 帧，丢弃 {} 帧",
                log_ctx(),
                self.frames_rendered,
                self.sync.dropped_frames()
            );
        }
        self.renderer = None;
        self.renderer_is_local = false;
        self.held_frame = None;
        self.last_rendered = None;
        self.extractor = None;
        self.connecting = None;
        self.connect_result = None;
        if let Some(source) = self.source.take() {
            source.disconnect();
        }

        self.state = PlaybackState::Idle;
        self.flags = SessionFlags::default();
        self.prepare_phase = PreparePhase::Idle;
        self.source_desc = None;
        self.seekable = false;
        self.live = false;
        self.duration_us = None;
        self.bitrate = None;
        self.video_meta = None;
        self.audio_meta = None;
        self.video_format = None;
        self.video_time_us = None;
        self.last_position_us = 0;
        self.frames_rendered = 0;
        self.buffering.reset();
        self.sync.reset();
        self.seek = SeekState::default();
        self.watch_audio_seek = false;
        self.watch_audio_eos = false;
        self.stream_done = None;
        self.pending_redisplay = None;
    }
}

fn as_decoder_init(err: PlayerError) -> PlayerError {
    match err {
        PlayerError::DecoderInitFailed(_) => err,
        other => PlayerError::DecoderInitFailed(other.to_string()),
    }
}
