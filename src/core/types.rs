use super::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 数据源描述
///
/// `set_data_source` 只保存描述，真正打开资源推迟到 prepare 阶段
#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceDesc {
    /// URI（本地路径、HTTP、RTSP 等）及附带的请求头
    Uri {
        uri: String,
        headers: HashMap<String, String>,
        protocol: StreamProtocol,
    },

    /// 已打开的文件句柄及其中的一段区间
    Fd { fd: i32, offset: i64, length: i64 },
}

impl DataSourceDesc {
    /// 从 URI 字符串解析数据源
    pub fn from_uri(uri: &str, headers: HashMap<String, String>) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(PlayerError::InvalidArgument("URI 为空".to_string()));
        }
        let protocol = StreamProtocol::from_uri(uri)?;
        Ok(DataSourceDesc::Uri {
            uri: uri.to_string(),
            headers,
            protocol,
        })
    }

    /// 从文件句柄区间构造数据源
    pub fn from_fd(fd: i32, offset: i64, length: i64) -> Result<Self> {
        if fd < 0 {
            return Err(PlayerError::InvalidArgument(format!("文件句柄无效: {}", fd)));
        }
        if offset < 0 || length <= 0 {
            return Err(PlayerError::InvalidArgument(format!(
                "文件区间无效: offset={} length={}",
                offset, length
            )));
        }
        offset
            .checked_add(length)
            .ok_or_else(|| PlayerError::InvalidArgument("文件区间溢出".to_string()))?;
        Ok(DataSourceDesc::Fd { fd, offset, length })
    }

    pub fn protocol(&self) -> StreamProtocol {
        match self {
            DataSourceDesc::Uri { protocol, .. } => *protocol,
            DataSourceDesc::Fd { .. } => StreamProtocol::File,
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        self.protocol().is_network()
    }

    /// 获取描述信息（用于日志）
    pub fn description(&self) -> String {
        match self {
            DataSourceDesc::Uri { uri, protocol, .. } => format!("{} ({})", uri, protocol.as_str()),
            DataSourceDesc::Fd { fd, offset, length } => {
                format!("fd:{} [{}..{}]", fd, offset, offset + length)
            }
        }
    }
}

/// 数据源协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamProtocol {
    /// 本地文件
    File,
    /// 进程内存中的合成媒体（mem://）
    Memory,
    /// 普通 HTTP 流（经缓存）
    HTTP,
    /// HTTP Live Streaming
    HLS,
    /// RTSP - 实时流协议
    RTSP,
    /// RTP 实时会话（时间戳没有意义，视频到达即渲染）
    RTP,
}

impl StreamProtocol {
    /// 根据 URI 前缀判断协议
    pub fn from_uri(uri: &str) -> Result<Self> {
        let lower = uri.to_ascii_lowercase();
        let protocol = if lower.starts_with("rtsp://") {
            StreamProtocol::RTSP
        } else if lower.starts_with("rtp://") {
            StreamProtocol::RTP
        } else if lower.starts_with("mem://") {
            StreamProtocol::Memory
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            if lower.ends_with(".m3u8") || lower.contains("/hls/") {
                StreamProtocol::HLS
            } else {
                StreamProtocol::HTTP
            }
        } else if lower.starts_with("file://") {
            StreamProtocol::File
        } else if lower.contains("://") {
            return Err(PlayerError::InvalidArgument(format!("不支持的协议: {}", uri)));
        } else {
            // 没有 scheme，当作本地路径
            StreamProtocol::File
        };
        Ok(protocol)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::File => "FILE",
            StreamProtocol::Memory => "MEM",
            StreamProtocol::HTTP => "HTTP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTP => "RTP",
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(
            self,
            StreamProtocol::HTTP | StreamProtocol::HLS | StreamProtocol::RTSP | StreamProtocol::RTP
        )
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 视频输出格式（解码尺寸 + 显示尺寸）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: i32,
    pub height: i32,
    pub display_width: i32,
    pub display_height: i32,
}

impl VideoFormat {
    pub fn new(pixel_format: PixelFormat, width: i32, height: i32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            display_width: width,
            display_height: height,
        }
    }
}

/// 解码单元（压缩包或解码后的帧）
///
/// 所有权即生命周期：谁持有 `MediaBuffer` 谁负责它，离开作用域即释放
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBuffer {
    pub timestamp_us: i64,
    pub is_sync: bool,
    pub data: Vec<u8>,
}

impl MediaBuffer {
    pub fn new(timestamp_us: i64, data: Vec<u8>) -> Self {
        Self {
            timestamp_us,
            is_sync: false,
            data,
        }
    }

    pub fn sync(mut self) -> Self {
        self.is_sync = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 冻结帧：挂起时保存的最后一帧原始数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenFrame {
    pub timestamp_us: i64,
    pub format: VideoFormat,
    pub data: Vec<u8>,
}

impl FrozenFrame {
    pub fn to_buffer(&self) -> MediaBuffer {
        MediaBuffer::new(self.timestamp_us, self.data.clone())
    }
}

/// Started 状态下的数据流状况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// 正常播放
    Playing,
    /// 缓存不足，内部暂停（用户意图仍是播放）
    Underrun,
}

/// 播放生命周期状态
///
/// 缓存不足只能出现在 `Started` 中，其它状态无法表达该组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    DataSourceSet,
    Preparing,
    Prepared,
    Started(Flow),
    Paused,
    Error,
}

impl PlaybackState {
    pub fn is_started(&self) -> bool {
        matches!(self, PlaybackState::Started(_))
    }

    /// 已完成准备（可以 play/seek）
    pub fn is_prepared(&self) -> bool {
        matches!(
            self,
            PlaybackState::Prepared | PlaybackState::Started(_) | PlaybackState::Paused
        )
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_us: Option<i64>,
    pub width: i32,
    pub height: i32,
    pub has_audio: bool,
    pub has_video: bool,
    pub bitrate: Option<i64>,
    pub seekable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_uris_by_scheme() {
        let cases = [
            ("rtsp://cam/1", StreamProtocol::RTSP),
            ("rtp://239.0.0.1:5004", StreamProtocol::RTP),
            ("https://cdn/live/index.m3u8", StreamProtocol::HLS),
            ("http://host/movie.mp4", StreamProtocol::HTTP),
            ("mem://5s-clip", StreamProtocol::Memory),
            ("/sdcard/movie.mp4", StreamProtocol::File),
            ("file:///tmp/a.mkv", StreamProtocol::File),
        ];
        for (uri, expected) in cases {
            let desc = DataSourceDesc::from_uri(uri, HashMap::new()).unwrap();
            assert_eq!(desc.protocol(), expected, "{}", uri);
        }
    }

    #[test]
    fn rejects_malformed_descriptions() {
        assert!(matches!(
            DataSourceDesc::from_uri("   ", HashMap::new()),
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(matches!(
            DataSourceDesc::from_uri("gopher://old", HashMap::new()),
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(DataSourceDesc::from_fd(-1, 0, 10).is_err());
        assert!(DataSourceDesc::from_fd(3, -5, 10).is_err());
        assert!(DataSourceDesc::from_fd(3, 0, 0).is_err());
        assert!(DataSourceDesc::from_fd(3, i64::MAX, 10).is_err());
        assert!(DataSourceDesc::from_fd(3, 128, 4096).is_ok());
    }

    #[test]
    fn network_protocols() {
        assert!(StreamProtocol::RTSP.is_network());
        assert!(StreamProtocol::RTP.is_network());
        assert!(!StreamProtocol::Memory.is_network());

        let rtsp = DataSourceDesc::from_uri("rtsp://cam/vod", HashMap::new()).unwrap();
        assert!(rtsp.is_network_stream());
        let clip = DataSourceDesc::from_uri("mem://5s-clip", HashMap::new()).unwrap();
        assert!(!clip.is_network_stream());
        assert!(!DataSourceDesc::from_fd(3, 0, 4096).unwrap().is_network_stream());
    }
}
