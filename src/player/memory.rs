use super::backend::MediaBackend;
use super::source::{
    AudioPlayer, CacheStatus, DataSource, Decoder, Extractor, MediaTrack, ReadOptions, ReadOutcome, Renderer,
    TrackMeta,
};
use crate::core::{
    log_ctx, DataSourceDesc, MediaBuffer, PixelFormat, PlayerError, Result, SystemTimeSource,
    TimeSource, VideoFormat,
};
use crossbeam::queue::SegQueue;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const VIDEO_MIME: &str = "video/raw";
pub const AUDIO_MIME: &str = "audio/raw";

/// 音频数据单元时长
const AUDIO_UNIT_US: i64 = 20_000;

/// 内存片段描述
///
/// 视频帧时间戳为 `i * 1_000_000 / frame_rate`，数据里编码了时间戳和帧序号，
/// 渲染记录据此还原出是哪一帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryClip {
    pub duration_us: i64,
    pub has_video: bool,
    pub has_audio: bool,
    pub frame_rate: i64,
    /// 每多少帧一个同步帧
    pub gop_size: i64,
    pub width: i32,
    pub height: i32,
    pub video_bitrate: Option<i64>,
    pub audio_bitrate: Option<i64>,
    /// 像网络流一样上报缓存状态
    pub streaming: bool,
    pub live: bool,
    pub seekable: bool,
    pub auto_loop: bool,
    /// 连接耗时；期间 disconnect 会打断连接
    pub connect_delay: Option<Duration>,
    /// 连接期间不理会 disconnect，必须等满 `connect_delay`
    pub ignores_disconnect: bool,
    pub connect_error: Option<PlayerError>,
    pub discontinuity_at_us: Option<i64>,
    pub corrupt_frame_at_us: Option<i64>,
    pub fatal_video_error_at_us: Option<i64>,
}

impl MemoryClip {
    pub fn new(duration_us: i64) -> Self {
        Self {
            duration_us: duration_us.max(0),
            has_video: true,
            has_audio: true,
            frame_rate: 30,
            gop_size: 1,
            width: 640,
            height: 360,
            video_bitrate: Some(2_000_000),
            audio_bitrate: Some(128_000),
            streaming: false,
            live: false,
            seekable: true,
            auto_loop: false,
            connect_delay: None,
            ignores_disconnect: false,
            connect_error: None,
            discontinuity_at_us: None,
            corrupt_frame_at_us: None,
            fatal_video_error_at_us: None,
        }
    }

    /// 按名字生成片段：`5s-clip`、`500ms-clip`
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(ms) = name.strip_suffix("ms-clip") {
            return ms.parse::<i64>().ok().map(|ms| Self::new(ms * 1_000));
        }
        name.strip_suffix("s-clip")
            .and_then(|s| s.parse::<i64>().ok())
            .map(|s| Self::new(s * 1_000_000))
    }

    pub fn video_only(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.has_video = false;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn live(mut self) -> Self {
        self.live = true;
        self.streaming = true;
        self.seekable = false;
        self
    }

    pub fn auto_loop(mut self) -> Self {
        self.auto_loop = true;
        self
    }

    pub fn gop(mut self, gop_size: i64) -> Self {
        self.gop_size = gop_size.max(1);
        self
    }

    pub fn blocking_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// 连接耗时 `delay`，期间 disconnect 不起作用
    pub fn stubborn_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self.ignores_disconnect = true;
        self
    }

    pub fn failing_connect(mut self, err: PlayerError) -> Self {
        self.connect_error = Some(err);
        self
    }

    pub fn discontinuity_at(mut self, time_us: i64) -> Self {
        self.discontinuity_at_us = Some(time_us);
        self
    }

    pub fn corrupt_frame_at(mut self, time_us: i64) -> Self {
        self.corrupt_frame_at_us = Some(time_us);
        self
    }

    pub fn fatal_video_error_at(mut self, time_us: i64) -> Self {
        self.fatal_video_error_at_us = Some(time_us);
        self
    }

    pub fn without_bitrates(mut self) -> Self {
        self.video_bitrate = None;
        self.audio_bitrate = None;
        self
    }

    /// 按声明码率推算的总字节数
    pub fn total_bytes(&self) -> Option<u64> {
        let mut bitrate = 0;
        if self.has_video {
            bitrate += self.video_bitrate?;
        }
        if self.has_audio {
            bitrate += self.audio_bitrate?;
        }
        Some((bitrate as i128 * self.duration_us as i128 / 8_000_000) as u64)
    }

    fn video_format(&self) -> VideoFormat {
        VideoFormat::new(PixelFormat::YUV420P, self.width, self.height)
    }
}

/// 帧数据：时间戳 + 帧序号（小端）
fn encode_unit(timestamp_us: i64, index: i64) -> Vec<u8> {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&timestamp_us.to_le_bytes());
    data.extend_from_slice(&index.to_le_bytes());
    data
}

/// 从帧数据中取出帧序号
pub fn unit_index(data: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = data.get(8..16)?.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}

// ==================== 实例计数 ====================

#[derive(Clone, Default)]
struct InstanceCounter(Arc<AtomicUsize>);

impl InstanceCounter {
    fn guard(&self) -> InstanceGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InstanceGuard(self.0.clone())
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct InstanceGuard(Arc<AtomicUsize>);

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ==================== 缓存状态 ====================

/// 外部驱动的缓存状态，模拟网络下载进度
#[derive(Clone)]
pub struct CacheControl {
    status: Arc<Mutex<CacheStatus>>,
}

impl CacheControl {
    fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(CacheStatus {
                cached_bytes: 0,
                cached_duration_us: None,
                eos: true,
            })),
        }
    }

    pub fn set_cached_bytes(&self, bytes: u64) {
        self.status.lock().cached_bytes = bytes;
    }

    pub fn set_cached_duration_us(&self, duration_us: Option<i64>) {
        self.status.lock().cached_duration_us = duration_us;
    }

    pub fn set_eos(&self, eos: bool) {
        self.status.lock().eos = eos;
    }

    pub fn set(&self, status: CacheStatus) {
        *self.status.lock() = status;
    }

    pub fn status(&self) -> CacheStatus {
        *self.status.lock()
    }
}

/// 一次渲染记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRecord {
    pub timestamp_us: i64,
    pub frame_index: Option<i64>,
    /// 由恢复时的本地渲染器输出
    pub local: bool,
}

// ==================== 数据源 ====================

struct MemorySource {
    uri: String,
    clip: MemoryClip,
    cache: CacheControl,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    _guard: InstanceGuard,
}

impl DataSource for MemorySource {
    fn connect(&self) -> Result<()> {
        match self.clip.connect_delay {
            Some(delay) if self.clip.ignores_disconnect => thread::sleep(delay),
            Some(delay) => match self.cancel_rx.recv_timeout(delay) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(PlayerError::NotConnected(format!("连接被中断: {}", self.uri)));
                }
                Err(RecvTimeoutError::Timeout) => {}
            },
            None => {
                if let Ok(()) | Err(TryRecvError::Disconnected) = self.cancel_rx.try_recv() {
                    return Err(PlayerError::NotConnected(format!("连接被中断: {}", self.uri)));
                }
            }
        }
        match &self.clip.connect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn disconnect(&self) {
        let _ = self.cancel_tx.try_send(());
    }

    fn size(&self) -> Option<u64> {
        self.clip.total_bytes()
    }

    fn cache_status(&self) -> Option<CacheStatus> {
        self.clip.streaming.then(|| self.cache.status())
    }

    fn is_live(&self) -> bool {
        self.clip.live
    }

    fn description(&self) -> String {
        self.uri.clone()
    }
}

// ==================== 解封装 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Video,
    Audio,
}

struct MemoryExtractor {
    clip: MemoryClip,
    tracks: Vec<UnitKind>,
    instances: InstanceCounter,
    _source: Arc<dyn DataSource>,
    _guard: InstanceGuard,
}

impl Extractor for MemoryExtractor {
    fn count_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn track_meta(&self, index: usize) -> Result<TrackMeta> {
        let kind = self
            .tracks
            .get(index)
            .ok_or_else(|| PlayerError::InvalidArgument(format!("轨道不存在: {}", index)))?;
        Ok(match kind {
            UnitKind::Video => TrackMeta {
                mime: VIDEO_MIME.to_string(),
                bitrate: self.clip.video_bitrate,
                duration_us: Some(self.clip.duration_us),
                width: Some(self.clip.width),
                height: Some(self.clip.height),
                auto_loop: self.clip.auto_loop,
            },
            UnitKind::Audio => TrackMeta {
                mime: AUDIO_MIME.to_string(),
                bitrate: self.clip.audio_bitrate,
                duration_us: Some(self.clip.duration_us),
                width: None,
                height: None,
                auto_loop: self.clip.auto_loop,
            },
        })
    }

    fn track(&mut self, index: usize) -> Result<Box<dyn MediaTrack>> {
        let kind = *self
            .tracks
            .get(index)
            .ok_or_else(|| PlayerError::InvalidArgument(format!("轨道不存在: {}", index)))?;
        Ok(Box::new(MemoryTrack {
            kind,
            clip: self.clip.clone(),
            next: 0,
            discontinuity_sent: false,
            corrupt_sent: false,
            _guard: self.instances.guard(),
        }))
    }

    fn is_seekable(&self) -> bool {
        self.clip.seekable
    }
}

struct MemoryTrack {
    kind: UnitKind,
    clip: MemoryClip,
    next: i64,
    discontinuity_sent: bool,
    corrupt_sent: bool,
    _guard: InstanceGuard,
}

impl MemoryTrack {
    fn timestamp_of(&self, index: i64) -> i64 {
        match self.kind {
            UnitKind::Video => index * 1_000_000 / self.clip.frame_rate,
            UnitKind::Audio => index * AUDIO_UNIT_US,
        }
    }

    fn index_at(&self, time_us: i64) -> i64 {
        match self.kind {
            UnitKind::Video => time_us * self.clip.frame_rate / 1_000_000,
            UnitKind::Audio => time_us / AUDIO_UNIT_US,
        }
    }

    fn unit_count(&self) -> i64 {
        match self.kind {
            UnitKind::Video => (self.clip.duration_us * self.clip.frame_rate + 999_999) / 1_000_000,
            UnitKind::Audio => (self.clip.duration_us + AUDIO_UNIT_US - 1) / AUDIO_UNIT_US,
        }
    }
}

impl MediaTrack for MemoryTrack {
    fn read(&mut self, options: &ReadOptions) -> Result<ReadOutcome> {
        let count = self.unit_count();
        if let Some(target) = options.seek_to_us {
            let index = self.index_at(target.max(0)).min(count);
            self.next = match self.kind {
                UnitKind::Video => index / self.clip.gop_size * self.clip.gop_size,
                UnitKind::Audio => index,
            };
        }

        loop {
            if self.next >= count {
                return Ok(ReadOutcome::EndOfStream);
            }
            let index = self.next;
            let timestamp_us = self.timestamp_of(index);

            if self.kind == UnitKind::Video {
                if let Some(at) = self.clip.discontinuity_at_us {
                    if timestamp_us >= at && !self.discontinuity_sent {
                        self.discontinuity_sent = true;
                        return Ok(ReadOutcome::Discontinuity);
                    }
                }
                if let Some(at) = self.clip.fatal_video_error_at_us {
                    if timestamp_us >= at {
                        return Err(PlayerError::Io(format!("模拟读取失败: {}us", timestamp_us)));
                    }
                }
            }

            self.next += 1;

            if self.kind == UnitKind::Video {
                if let Some(at) = self.clip.corrupt_frame_at_us {
                    if timestamp_us >= at && !self.corrupt_sent {
                        self.corrupt_sent = true;
                        return Err(PlayerError::DecodeCorrupt(format!("模拟损坏帧: {}us", timestamp_us)));
                    }
                }
            }
            if let Some(skip) = options.skip_frame_us {
                if timestamp_us < skip {
                    continue;
                }
            }

            let buffer = MediaBuffer::new(timestamp_us, encode_unit(timestamp_us, index));
            let is_sync = self.kind == UnitKind::Audio || index % self.clip.gop_size == 0;
            return Ok(ReadOutcome::Buffer(if is_sync { buffer.sync() } else { buffer }));
        }
    }
}

// ==================== 解码 ====================

struct MemoryDecoder {
    track: Box<dyn MediaTrack>,
    format: Option<VideoFormat>,
    started: bool,
    _guard: InstanceGuard,
}

impl Decoder for MemoryDecoder {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn read(&mut self, options: &ReadOptions) -> Result<ReadOutcome> {
        if !self.started {
            return Err(PlayerError::InvalidState("解码器未启动".to_string()));
        }
        self.track.read(options)
    }

    fn output_format(&self) -> Option<VideoFormat> {
        self.format
    }

    fn into_track(self: Box<Self>) -> Box<dyn MediaTrack> {
        self.track
    }
}

/// 模拟音频输出：播放时媒体时间随实时时间前进，seek 立即完成
struct MemoryAudioPlayer {
    decoder: Box<dyn Decoder>,
    duration_us: i64,
    clock: SystemTimeSource,
    started: bool,
    playing: bool,
    media_base_us: i64,
    real_base_us: i64,
    resumed_at_us: i64,
    _guard: InstanceGuard,
}

impl MemoryAudioPlayer {
    fn elapsed_us(&self) -> i64 {
        if self.playing {
            self.clock.real_time_us() - self.resumed_at_us
        } else {
            0
        }
    }

    /// 把已播放的时间计入基准
    fn fold_elapsed(&mut self) {
        let elapsed = self.elapsed_us();
        self.media_base_us += elapsed;
        self.real_base_us += elapsed;
        self.resumed_at_us = self.clock.real_time_us();
    }
}

impl AudioPlayer for MemoryAudioPlayer {
    fn start(&mut self, source_already_started: bool) -> Result<()> {
        if !source_already_started {
            self.decoder.start()?;
        }
        self.started = true;
        self.playing = true;
        self.resumed_at_us = self.clock.real_time_us();
        Ok(())
    }

    fn pause(&mut self, _play_pending_samples: bool) {
        if self.playing {
            self.fold_elapsed();
            self.playing = false;
        }
    }

    fn resume(&mut self) {
        if self.started && !self.playing {
            self.playing = true;
            self.resumed_at_us = self.clock.real_time_us();
        }
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        self.fold_elapsed();
        self.media_base_us = time_us.clamp(0, self.duration_us);
        Ok(())
    }

    fn media_time_us(&self) -> i64 {
        (self.media_base_us + self.elapsed_us()).min(self.duration_us)
    }

    fn media_time_mapping(&self) -> Option<(i64, i64)> {
        self.started
            .then(|| (self.real_base_us + self.elapsed_us(), self.media_base_us + self.elapsed_us()))
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn reached_eos(&self) -> Option<Result<()>> {
        (self.started && self.media_time_us() >= self.duration_us).then_some(Ok(()))
    }

    fn real_time_us(&self) -> i64 {
        self.real_base_us + self.elapsed_us()
    }

    fn stop(&mut self) {
        self.playing = false;
        self.started = false;
        self.decoder.stop();
    }
}

struct MemoryRenderer {
    log: Arc<SegQueue<RenderRecord>>,
    local: bool,
}

impl Renderer for MemoryRenderer {
    fn render(&mut self, buffer: &MediaBuffer) {
        self.log.push(RenderRecord {
            timestamp_us: buffer.timestamp_us,
            frame_index: unit_index(&buffer.data),
            local: self.local,
        });
    }
}

// ==================== 后端 ====================

/// 内存媒体后端
///
/// 为 `mem://<名字>` 提供全套协作组件。名字先查注册表，查不到时按
/// `5s-clip` / `500ms-clip` 的格式生成默认片段（30fps 视频 + 音频）。
/// 以完整 URI 注册的片段（如 `rtsp://cam/vod`）也由本后端打开。
pub struct MemoryBackend {
    clips: Mutex<HashMap<String, MemoryClip>>,
    cache: CacheControl,
    instances: InstanceCounter,
    decoders_created: AtomicUsize,
    rendered: Arc<SegQueue<RenderRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            clips: Mutex::new(HashMap::new()),
            cache: CacheControl::new(),
            instances: InstanceCounter::default(),
            decoders_created: AtomicUsize::new(0),
            rendered: Arc::new(SegQueue::new()),
        }
    }

    /// 注册片段；`name` 可以是 `mem://` 之后的名字，也可以是完整 URI
    pub fn register(&self, name: &str, clip: MemoryClip) {
        debug!("{} 注册内存片段: {} -> {:?}", log_ctx(), name, clip);
        self.clips.lock().insert(name.to_string(), clip);
    }

    /// 流式片段共用的缓存状态
    pub fn cache(&self) -> CacheControl {
        self.cache.clone()
    }

    /// 仍然存活的数据源、解封装器、轨道、解码器和音频播放器数量
    pub fn live_instances(&self) -> usize {
        self.instances.get()
    }

    pub fn decoders_created(&self) -> usize {
        self.decoders_created.load(Ordering::SeqCst)
    }

    /// 取出到目前为止的渲染记录（按渲染顺序）
    pub fn take_rendered(&self) -> Vec<RenderRecord> {
        let mut records = Vec::with_capacity(self.rendered.len());
        while let Some(record) = self.rendered.pop() {
            records.push(record);
        }
        records
    }

    fn clip_named(&self, name: &str) -> Result<MemoryClip> {
        if let Some(clip) = self.clips.lock().get(name) {
            return Ok(clip.clone());
        }
        MemoryClip::parse(name).ok_or_else(|| PlayerError::Io(format!("内存片段不存在: {}", name)))
    }

    fn clip_for_description(&self, description: &str) -> Result<MemoryClip> {
        if let Some(clip) = self.clips.lock().get(description) {
            return Ok(clip.clone());
        }
        let name = description
            .strip_prefix("mem://")
            .ok_or_else(|| PlayerError::UnknownFormat(format!("不是内存数据源: {}", description)))?;
        self.clip_named(name)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for MemoryBackend {
    fn open_source(&self, desc: &DataSourceDesc) -> Result<Arc<dyn DataSource>> {
        let uri = match desc {
            DataSourceDesc::Uri { uri, .. } => uri,
            DataSourceDesc::Fd { .. } => {
                return Err(PlayerError::UnknownFormat(format!(
                    "内存后端不支持该数据源: {}",
                    desc.description()
                )))
            }
        };
        let clip = self.clip_for_description(uri)?;
        info!("{} 📼 打开内存片段: {} ({}us)", log_ctx(), uri, clip.duration_us);
        let (cancel_tx, cancel_rx) = bounded(1);
        Ok(Arc::new(MemorySource {
            uri: uri.clone(),
            clip,
            cache: self.cache.clone(),
            cancel_tx,
            cancel_rx,
            _guard: self.instances.guard(),
        }))
    }

    fn create_extractor(&self, source: Arc<dyn DataSource>) -> Result<Box<dyn Extractor>> {
        let clip = self.clip_for_description(&source.description())?;
        let mut tracks = Vec::new();
        if clip.has_video {
            tracks.push(UnitKind::Video);
        }
        if clip.has_audio {
            tracks.push(UnitKind::Audio);
        }
        Ok(Box::new(MemoryExtractor {
            clip,
            tracks,
            instances: self.instances.clone(),
            _source: source,
            _guard: self.instances.guard(),
        }))
    }

    fn create_decoder(&self, track: Box<dyn MediaTrack>, meta: &TrackMeta) -> Result<Box<dyn Decoder>> {
        let format = match (meta.is_video(), meta.width, meta.height) {
            (true, Some(w), Some(h)) => Some(VideoFormat::new(PixelFormat::YUV420P, w, h)),
            _ => None,
        };
        let created = self.decoders_created.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{} 创建解码器 #{}: {}", log_ctx(), created, meta.mime);
        Ok(Box::new(MemoryDecoder {
            track,
            format,
            started: false,
            _guard: self.instances.guard(),
        }))
    }

    fn create_audio_player(&self, decoder: Box<dyn Decoder>, meta: &TrackMeta) -> Result<Box<dyn AudioPlayer>> {
        let clock = SystemTimeSource::new();
        let now = clock.real_time_us();
        Ok(Box::new(MemoryAudioPlayer {
            decoder,
            duration_us: meta.duration_us.unwrap_or(i64::MAX),
            clock,
            started: false,
            playing: false,
            media_base_us: 0,
            real_base_us: 0,
            resumed_at_us: now,
            _guard: self.instances.guard(),
        }))
    }

    fn create_renderer(&self, _format: &VideoFormat) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(MemoryRenderer {
            log: self.rendered.clone(),
            local: false,
        }))
    }

    fn create_local_renderer(&self, _format: &VideoFormat) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(MemoryRenderer {
            log: self.rendered.clone(),
            local: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track(clip: MemoryClip) -> MemoryTrack {
        MemoryTrack {
            kind: UnitKind::Video,
            clip,
            next: 0,
            discontinuity_sent: false,
            corrupt_sent: false,
            _guard: InstanceCounter::default().guard(),
        }
    }

    fn next_timestamp(track: &mut MemoryTrack, options: &ReadOptions) -> i64 {
        match track.read(options).unwrap() {
            ReadOutcome::Buffer(buffer) => buffer.timestamp_us,
            other => panic!("expected a buffer, got {:?}", other),
        }
    }

    #[test]
    fn parses_clip_names() {
        assert_eq!(MemoryClip::parse("5s-clip").map(|c| c.duration_us), Some(5_000_000));
        assert_eq!(MemoryClip::parse("250ms-clip").map(|c| c.duration_us), Some(250_000));
        assert!(MemoryClip::parse("movie.mp4").is_none());
    }

    #[test]
    fn seek_lands_on_preceding_sync_frame() {
        let mut track = video_track(MemoryClip::new(5_000_000).gop(30));
        assert_eq!(next_timestamp(&mut track, &ReadOptions::seek_to(1_500_000)), 1_000_000);
        let mut exact = video_track(MemoryClip::new(5_000_000));
        assert_eq!(next_timestamp(&mut exact, &ReadOptions::seek_to(1_000_000)), 1_000_000);
    }

    #[test]
    fn injected_faults_surface_once() {
        let clip = MemoryClip::new(1_000_000)
            .discontinuity_at(100_000)
            .corrupt_frame_at(200_000);
        let mut track = video_track(clip);
        let options = ReadOptions::default();
        let mut outcomes = Vec::new();
        for _ in 0..40 {
            match track.read(&options) {
                Ok(ReadOutcome::Discontinuity) => outcomes.push("discontinuity"),
                Err(PlayerError::DecodeCorrupt(_)) => outcomes.push("corrupt"),
                Ok(ReadOutcome::EndOfStream) => {
                    outcomes.push("eos");
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(outcomes, vec!["discontinuity", "corrupt", "eos"]);
    }

    #[test]
    fn blocking_connect_is_released_by_disconnect() {
        let backend = MemoryBackend::new();
        backend.register("slow", MemoryClip::new(1_000_000).blocking_connect(Duration::from_secs(30)));
        let desc = DataSourceDesc::from_uri("mem://slow", HashMap::new()).unwrap();
        let source = backend.open_source(&desc).unwrap();
        let connecting = source.clone();
        let worker = std::thread::spawn(move || connecting.connect());
        std::thread::sleep(Duration::from_millis(50));
        source.disconnect();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(PlayerError::NotConnected(_))));
        drop(source);
        assert_eq!(backend.live_instances(), 0);
    }

    #[test]
    fn stubborn_connect_outlasts_disconnect() {
        let backend = MemoryBackend::new();
        backend.register("stubborn", MemoryClip::new(1_000_000).stubborn_connect(Duration::from_millis(200)));
        let desc = DataSourceDesc::from_uri("mem://stubborn", HashMap::new()).unwrap();
        let source = backend.open_source(&desc).unwrap();
        let connecting = source.clone();
        let started = std::time::Instant::now();
        let worker = std::thread::spawn(move || connecting.connect());
        std::thread::sleep(Duration::from_millis(20));
        source.disconnect();
        assert!(worker.join().unwrap().is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn opens_clips_registered_by_full_uri() {
        let backend = MemoryBackend::new();
        backend.register("rtsp://cam/vod", MemoryClip::new(2_000_000).streaming());
        let desc = DataSourceDesc::from_uri("rtsp://cam/vod", HashMap::new()).unwrap();
        let source = backend.open_source(&desc).unwrap();
        assert_eq!(source.description(), "rtsp://cam/vod");
        assert!(!source.is_live());
        assert_eq!(backend.create_extractor(source).unwrap().count_tracks(), 2);

        let unknown = DataSourceDesc::from_uri("rtsp://cam/other", HashMap::new()).unwrap();
        assert!(matches!(backend.open_source(&unknown), Err(PlayerError::UnknownFormat(_))));
        let fd = DataSourceDesc::from_fd(3, 0, 4096).unwrap();
        assert!(matches!(backend.open_source(&fd), Err(PlayerError::UnknownFormat(_))));
    }

    #[test]
    fn audio_clock_stops_while_paused() {
        let backend = MemoryBackend::new();
        let decoder = backend
            .create_decoder(Box::new(video_track(MemoryClip::new(1_000_000))), &TrackMeta::default())
            .unwrap();
        let meta = TrackMeta {
            mime: AUDIO_MIME.to_string(),
            duration_us: Some(10_000_000),
            ..TrackMeta::default()
        };
        let mut player = backend.create_audio_player(decoder, &meta).unwrap();
        player.start(true).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        player.pause(false);
        let paused_at = player.media_time_us();
        assert!(paused_at >= 20_000);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(player.media_time_us(), paused_at);
        player.seek_to(5_000_000).unwrap();
        assert_eq!(player.media_time_us(), 5_000_000);
        assert!(player.reached_eos().is_none());
    }
}
