use super::session::Session;
use crate::core::{log_ctx, DataSourceDesc, FrozenFrame, PlayerError, Result};
use log::info;

/// 挂起前需要恢复的播放标志
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SavedFlags {
    pub playing: bool,
    pub looping: bool,
    pub auto_looping: bool,
    pub at_eos: bool,
}

/// 挂起快照
///
/// 挂起时释放全部解码资源，只留下重建会话所需的信息和最后一帧画面
#[derive(Debug, Clone)]
pub struct SuspensionSnapshot {
    pub source: DataSourceDesc,
    pub flags: SavedFlags,
    pub position_us: i64,
    pub frozen_frame: Option<FrozenFrame>,
}

impl Session {
    pub fn capture_snapshot_l(&mut self) -> Result<SuspensionSnapshot> {
        let source = self
            .source_desc
            .clone()
            .ok_or_else(|| PlayerError::InvalidState("没有可挂起的会话".to_string()))?;
        let flags = SavedFlags {
            playing: self.state.is_started(),
            looping: self.flags.looping,
            auto_looping: self.flags.auto_looping,
            at_eos: self.at_eos_l(),
        };
        let position_us = self.position_l();

        // 上次恢复的冻结帧还没被新帧替换时沿用它，否则拷贝当前画面
        let frozen_frame = match self.pending_redisplay.take() {
            Some(frame) => Some(frame),
            None => match (&self.last_rendered, self.video_format) {
                (Some(buffer), Some(format)) => Some(FrozenFrame {
                    timestamp_us: buffer.timestamp_us,
                    format,
                    data: buffer.data.clone(),
                }),
                _ => None,
            },
        };

        info!(
            "{} 💤 挂起快照: 位置={}us 播放中={} 冻结帧={:?}",
            log_ctx(),
            position_us,
            flags.playing,
            frozen_frame.as_ref().map(|f| f.timestamp_us)
        );
        Ok(SuspensionSnapshot {
            source,
            flags,
            position_us,
            frozen_frame,
        })
    }

    /// 用本地渲染器先显示冻结帧，直到新解码的帧替换它
    pub fn restore_frozen_frame_l(&mut self, frame: &FrozenFrame) -> Result<()> {
        let mut renderer = self.backend.create_local_renderer(&frame.format)?;
        renderer.render(&frame.to_buffer());
        info!("{} 🧊 显示冻结帧: PTS={}us", log_ctx(), frame.timestamp_us);
        self.renderer = Some(renderer);
        self.renderer_is_local = true;
        self.video_format = Some(frame.format);
        self.pending_redisplay = Some(frame.clone());
        Ok(())
    }

    /// 恢复挂起前的循环和结束标志（准备完成之后调用）
    pub fn restore_flags_l(&mut self, flags: &SavedFlags) {
        self.flags.looping = flags.looping;
        self.flags.auto_looping |= flags.auto_looping;
        if flags.at_eos {
            self.flags.video_eos = self.video_decoder.is_some();
            self.flags.audio_eos = self.audio_player.is_some() || self.audio_decoder.is_some();
        }
    }
}
