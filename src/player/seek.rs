use super::listener::Notification;
use super::session::{EventKind, Session};
use crate::core::{log_ctx, Flow, PlaybackState, Result};
use log::{info, warn};

/// 进行中的 seek
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct SeekState {
    pub seeking: bool,
    pub target_us: i64,
    /// 本次 seek 的完成通知已经发出
    pub notification_sent: bool,
    /// 暂停/已准备状态下的 seek：解码并显示一帧后停下
    pub preview: bool,
}

// ==================== Seek 协调 ====================
//
// 有视频时由视频事件驱动：下一次读帧带上 seek 选项，拿到第一帧后
// 再把音频 seek 到该帧的实际时间戳（关键帧可能早于目标），
// 音频 seek 完成后才发 SeekComplete。只有音频时直接 seek 音频。
impl Session {
    pub fn seek_to_l(&mut self, target_us: i64) -> Result<()> {
        if !self.seekable {
            info!("{} ⏭️ 数据源不支持 seek，忽略: {}us", log_ctx(), target_us);
            return Ok(());
        }
        let target_us = match self.duration_us {
            Some(duration) => target_us.clamp(0, duration),
            None => target_us.max(0),
        };
        info!("{} 🎯 Seek 到 {}us（状态 {:?}）", log_ctx(), target_us, self.state);

        // 被新请求取代的 seek 也要有一次完成通知
        if (self.seek.seeking || self.watch_audio_seek) && !self.seek.notification_sent {
            self.notify_l(Notification::SeekComplete);
        }

        if self.state == PlaybackState::Started(Flow::Underrun) {
            // 缓存不足时 seek：先恢复，之后的缓冲检查重新判断
            self.leave_underrun_l();
        }

        self.seek = SeekState {
            seeking: true,
            target_us,
            notification_sent: false,
            preview: false,
        };
        self.watch_audio_seek = false;
        self.flags.audio_eos = false;
        self.flags.video_eos = false;
        self.held_frame = None;
        self.buffering.rearm_eos_report();

        let started = self.state.is_started();
        if !started {
            // 没有在播放：不会有新帧，立即完成
            self.seek.notification_sent = true;
            self.notify_l(Notification::SeekComplete);
        }

        if self.video_decoder.is_some() {
            if started {
                if let Some(player) = self.audio_player.as_mut() {
                    player.pause(false);
                }
            } else {
                self.seek.preview = true;
            }
            self.cancel_event_l(EventKind::Video);
            self.post_event_l(EventKind::Video, 0);
            Ok(())
        } else {
            self.seek_audio_if_necessary_l()
        }
    }

    /// 只有音频时：直接 seek 音频播放器，完成后由音频状态事件通知
    pub fn seek_audio_if_necessary_l(&mut self) -> Result<()> {
        if !self.seek.seeking || self.video_decoder.is_some() {
            return Ok(());
        }
        let target_us = self.seek.target_us;
        let Some(player) = self.audio_player.as_mut() else {
            return Ok(());
        };
        player.seek_to(target_us)?;
        self.watch_audio_seek = true;
        self.watch_audio_eos = true;
        self.post_event_l(EventKind::AudioStatus, 0);
        Ok(())
    }

    /// seek 后第一帧已解码：音频跟到该帧，并让时钟在该帧重新锚定
    pub fn finish_seek_if_necessary_l(&mut self, video_time_us: i64) {
        if !self.seek.seeking {
            return;
        }
        info!(
            "{} 🎯 Seek 落在 {}us（请求 {}us）",
            log_ctx(),
            video_time_us,
            self.seek.target_us
        );

        let playing = self.state == PlaybackState::Started(Flow::Playing);
        if let Some(player) = self.audio_player.as_mut() {
            if let Err(e) = player.seek_to(video_time_us) {
                warn!("{} ⚠️ 音频 seek 失败: {}", log_ctx(), e);
            }
            if playing {
                player.resume();
            }
            self.watch_audio_seek = true;
            self.watch_audio_eos = true;
            self.post_event_l(EventKind::AudioStatus, 0);
        } else if !self.seek.notification_sent {
            self.seek.notification_sent = true;
            self.notify_l(Notification::SeekComplete);
        }

        self.sync.mark_seek();
        self.seek.seeking = false;
    }
}
