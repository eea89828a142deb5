// 播放编排引擎：状态机、定时事件队列、缓冲控制、音画同步、seek 与挂起/恢复

pub mod core;
pub mod player;

pub use crate::core::{PlaybackState, PlayerConfig, PlayerError, Result};
pub use crate::player::{MediaBackend, Notification, NotificationSink, PlaybackManager};
