// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod config;
pub mod error;

pub use types::*;
pub use clock::*;
pub use config::*;
pub use error::*;

/// 日志前缀：进程号 + 线程号，便于区分 API 线程和事件线程
pub fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", std::process::id(), std::thread::current().id())
}
