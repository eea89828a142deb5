use crate::core::{MediaBuffer, Result, VideoFormat};

/// 读取选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// 跳转到不晚于该时间的最近同步帧
    pub seek_to_us: Option<i64>,
    /// 跳过时间戳早于该值的帧（解码器内部丢弃，不输出）
    pub skip_frame_us: Option<i64>,
}

impl ReadOptions {
    pub fn seek_to(time_us: i64) -> Self {
        Self {
            seek_to_us: Some(time_us),
            skip_frame_us: None,
        }
    }
}

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 一个带时间戳的数据单元
    Buffer(MediaBuffer),
    /// 码流不连续：后续数据可能使用不同的解码参数
    Discontinuity,
    /// 流结束
    EndOfStream,
}

/// 数据源缓存状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatus {
    /// 已缓存但尚未消费的字节数
    pub cached_bytes: u64,
    /// 数据源直接给出的已缓存时长（例如 RTSP 会话的排队时长）
    pub cached_duration_us: Option<i64>,
    /// 数据源已读到末尾
    pub eos: bool,
}

/// 数据源（文件、HTTP 缓存、RTSP 会话……）
pub trait DataSource: Send + Sync {
    /// 建立连接，可能长时间阻塞
    fn connect(&self) -> Result<()>;

    /// 断开连接；必须能唤醒阻塞中的 `connect`，且自身不阻塞
    fn disconnect(&self);

    /// 总字节数（未知时为 None）
    fn size(&self) -> Option<u64> {
        None
    }

    /// 流式数据源返回缓存状态，本地文件返回 None
    fn cache_status(&self) -> Option<CacheStatus> {
        None
    }

    /// 实时源（没有终点、不可 seek）
    fn is_live(&self) -> bool {
        false
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 轨道元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMeta {
    pub mime: String,
    pub bitrate: Option<i64>,
    pub duration_us: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// 容器要求自动循环播放
    pub auto_loop: bool,
}

impl TrackMeta {
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with("audio/")
    }
}

/// 单条基本流，按时间顺序产出压缩数据
pub trait MediaTrack: Send {
    fn read(&mut self, options: &ReadOptions) -> Result<ReadOutcome>;
}

/// 解封装器抽象接口
pub trait Extractor: Send {
    fn count_tracks(&self) -> usize;

    fn track_meta(&self, index: usize) -> Result<TrackMeta>;

    fn track(&mut self, index: usize) -> Result<Box<dyn MediaTrack>>;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }
}

/// 解码器（音频或视频）
///
/// 解码器可能有自己的内部线程；`stop` 返回前必须等这些线程退出
pub trait Decoder: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn read(&mut self, options: &ReadOptions) -> Result<ReadOutcome>;

    /// 当前输出格式（仅视频解码器）
    fn output_format(&self) -> Option<VideoFormat> {
        None
    }

    /// 拆出底层轨道，用于码流不连续时重建解码器
    fn into_track(self: Box<Self>) -> Box<dyn MediaTrack>;
}

/// 音频播放器（音频输出 + 音频解码驱动）
pub trait AudioPlayer: Send {
    /// `source_already_started`：解码器已由调用方启动
    fn start(&mut self, source_already_started: bool) -> Result<()>;

    /// `play_pending_samples`：把已写入设备的样本播完再停（EOS 时使用）
    fn pause(&mut self, play_pending_samples: bool);

    fn resume(&mut self);

    fn seek_to(&mut self, time_us: i64) -> Result<()>;

    /// 当前已播放到的媒体时间
    fn media_time_us(&self) -> i64;

    /// 精确知道自己播放位置时返回 (实时时间, 媒体时间) 映射
    fn media_time_mapping(&self) -> Option<(i64, i64)>;

    fn is_seeking(&self) -> bool;

    /// 到达流末尾时返回最终状态
    fn reached_eos(&self) -> Option<Result<()>>;

    /// 音频时钟：按已渲染样本计算的实时时间
    fn real_time_us(&self) -> i64;

    /// 停止并等待内部线程退出
    fn stop(&mut self);
}

/// 视频渲染器
pub trait Renderer: Send {
    fn render(&mut self, buffer: &MediaBuffer);
}
