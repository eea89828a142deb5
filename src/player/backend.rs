use super::source::{AudioPlayer, DataSource, Decoder, Extractor, MediaTrack, Renderer, TrackMeta};
use crate::core::{DataSourceDesc, Result, VideoFormat};
use std::sync::Arc;

/// 媒体后端 - 负责创建播放器依赖的所有协作组件
///
/// 播放器只通过这个工厂拿到数据源、解封装器、解码器、音频播放器和渲染器，
/// 自身不关心容器格式、编解码和输出设备。
///
/// 调用约定：
/// - `open_source` 只构造对象，不做阻塞 I/O；连接在 `DataSource::connect` 中完成
/// - 其余方法都在事件线程上、持有会话锁时调用，应当尽快返回
pub trait MediaBackend: Send + Sync {
    fn open_source(&self, desc: &DataSourceDesc) -> Result<Arc<dyn DataSource>>;

    fn create_extractor(&self, source: Arc<dyn DataSource>) -> Result<Box<dyn Extractor>>;

    fn create_decoder(&self, track: Box<dyn MediaTrack>, meta: &TrackMeta) -> Result<Box<dyn Decoder>>;

    /// 音频播放器接管已启动的音频解码器
    fn create_audio_player(&self, decoder: Box<dyn Decoder>, meta: &TrackMeta) -> Result<Box<dyn AudioPlayer>>;

    fn create_renderer(&self, format: &VideoFormat) -> Result<Box<dyn Renderer>>;

    /// 轻量本地渲染器：恢复时先显示冻结帧，默认与普通渲染器相同
    fn create_local_renderer(&self, format: &VideoFormat) -> Result<Box<dyn Renderer>> {
        self.create_renderer(format)
    }
}
