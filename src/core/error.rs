use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 播放器错误
///
/// 所有变体都可以 `Clone`：异步准备的结果会被暂存，
/// 再交给同步 `prepare()` 的等待方或者通知回调。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("当前状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("无法连接数据源: {0}")]
    NotConnected(String),

    #[error("IO 错误: {0}")]
    Io(String),

    #[error("无法识别的媒体格式: {0}")]
    UnknownFormat(String),

    #[error("解码器初始化失败: {0}")]
    DecoderInitFailed(String),

    #[error("数据损坏: {0}")]
    DecodeCorrupt(String),

    #[error("等待数据超时")]
    Timeout,

    #[error("操作已取消")]
    Cancelled,

    #[error("资源耗尽: {0}")]
    ResourceExhausted(String),
}

impl From<std::io::Error> for PlayerError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => PlayerError::Timeout,
            std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => PlayerError::NotConnected(e.to_string()),
            _ => PlayerError::Io(e.to_string()),
        }
    }
}

/// 错误分类（用于 Error 通知的 ext1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument = 1,
    InvalidState = 2,
    NotConnected = 3,
    Io = 4,
    UnknownFormat = 5,
    DecoderInitFailed = 6,
    DecodeCorrupt = 7,
    Timeout = 8,
    Cancelled = 9,
    ResourceExhausted = 10,
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            PlayerError::InvalidState(_) => ErrorKind::InvalidState,
            PlayerError::NotConnected(_) => ErrorKind::NotConnected,
            PlayerError::Io(_) => ErrorKind::Io,
            PlayerError::UnknownFormat(_) => ErrorKind::UnknownFormat,
            PlayerError::DecoderInitFailed(_) => ErrorKind::DecoderInitFailed,
            PlayerError::DecodeCorrupt(_) => ErrorKind::DecodeCorrupt,
            PlayerError::Timeout => ErrorKind::Timeout,
            PlayerError::Cancelled => ErrorKind::Cancelled,
            PlayerError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
        }
    }

    /// 稳定的整数状态码（负数，便于跨进程透传）
    pub fn code(&self) -> i32 {
        match self {
            PlayerError::InvalidArgument(_) => -22,
            PlayerError::InvalidState(_) => -38,
            PlayerError::NotConnected(_) => -1003,
            PlayerError::Io(_) => -1004,
            PlayerError::UnknownFormat(_) => -1010,
            PlayerError::DecoderInitFailed(_) => -19,
            PlayerError::DecodeCorrupt(_) => -1007,
            PlayerError::Timeout => -110,
            PlayerError::Cancelled => -125,
            PlayerError::ResourceExhausted(_) => -12,
        }
    }

    /// 单个数据单元损坏可以跳过，不影响后续解码
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::DecodeCorrupt(_))
    }

    pub(crate) fn invalid_state(op: &str, state: impl std::fmt::Debug) -> Self {
        PlayerError::InvalidState(format!("{} 在 {:?} 状态下不可用", op, state))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_taxonomy() {
        let timeout: PlayerError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout, PlayerError::Timeout);

        let refused: PlayerError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope").into();
        assert_eq!(refused.kind(), ErrorKind::NotConnected);

        let other: PlayerError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(other.kind(), ErrorKind::Io);
        assert_eq!(other.code(), -1004);
    }

    #[test]
    fn only_corrupt_units_are_recoverable() {
        assert!(PlayerError::DecodeCorrupt("bad nal".into()).is_recoverable());
        assert!(!PlayerError::DecoderInitFailed("gone".into()).is_recoverable());
        assert!(!PlayerError::Cancelled.is_recoverable());
    }
}
