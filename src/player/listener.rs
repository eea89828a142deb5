use crate::core::{ErrorKind, PlayerError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// 信息类通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoKind {
    BufferingStart = 701,
    BufferingEnd = 702,
}

/// 播放器发给外部的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    Prepared,
    PlaybackComplete,
    SeekComplete,
    BufferingUpdate(i32),
    SetVideoSize { width: i32, height: i32 },
    Error { kind: ErrorKind, code: i32 },
    Info(InfoKind),
}

impl Notification {
    pub fn error(err: &PlayerError) -> Self {
        Notification::Error {
            kind: err.kind(),
            code: err.code(),
        }
    }

    /// 线上格式：(消息类型, ext1, ext2)
    pub fn params(&self) -> (i32, i32, i32) {
        match *self {
            Notification::Prepared => (1, 0, 0),
            Notification::PlaybackComplete => (2, 0, 0),
            Notification::BufferingUpdate(percent) => (3, percent, 0),
            Notification::SeekComplete => (4, 0, 0),
            Notification::SetVideoSize { width, height } => (5, width, height),
            Notification::Error { kind, code } => (100, kind as i32, code),
            Notification::Info(kind) => (200, kind as i32, 0),
        }
    }
}

/// 通知接收方
///
/// 在会话锁内按状态变化顺序调用；实现不能回调播放器，也不应阻塞
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// 把通知转发到 channel，供另一线程消费
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // 接收端已关闭时直接丢弃
        let _ = self.tx.send(notification);
    }
}

/// 丢弃所有通知
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_params() {
        assert_eq!(Notification::BufferingUpdate(42).params(), (3, 42, 0));
        assert_eq!(
            Notification::SetVideoSize { width: 640, height: 360 }.params(),
            (5, 640, 360)
        );
        let err = Notification::error(&PlayerError::Timeout);
        assert_eq!(err.params(), (100, ErrorKind::Timeout as i32, -110));
        assert_eq!(Notification::Info(InfoKind::BufferingStart).params(), (200, 701, 0));
    }

    #[test]
    fn channel_sink_preserves_order() {
        let (sink, rx) = ChannelSink::new();
        sink.notify(Notification::Prepared);
        sink.notify(Notification::SeekComplete);
        sink.notify(Notification::PlaybackComplete);
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![Notification::Prepared, Notification::SeekComplete, Notification::PlaybackComplete]
        );
    }
}
