// 播放器核心模块

pub mod backend;
pub mod buffering;
pub mod event_queue;
pub mod listener;
pub mod manager;
pub mod memory;
pub mod source;
pub mod sync;
mod seek;
mod session;
mod suspend;

pub use backend::MediaBackend;
pub use buffering::{BufferingAction, BufferingController, BufferingDecision, BufferingPhase};
pub use event_queue::{EventId, QueueHandle, TimedEventQueue};
pub use listener::{ChannelSink, InfoKind, Notification, NotificationSink, NullSink};
pub use manager::PlaybackManager;
pub use memory::{CacheControl, MemoryBackend, MemoryClip, RenderRecord};
pub use source::{
    AudioPlayer, CacheStatus, DataSource, Decoder, Extractor, MediaTrack, ReadOptions, ReadOutcome, Renderer,
    TrackMeta,
};
pub use sync::{ClockKind, ClockSynchronizer, FrameVerdict, TimeAnchor};
