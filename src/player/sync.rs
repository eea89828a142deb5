use crate::core::{log_ctx, PlayerConfig};
use log::{debug, info};

/// 时间锚点：(实时时间, 媒体时间)
///
/// 之后的帧截止时间 = real_time_us + (帧时间戳 - media_time_us)。
/// 锚点只会整体替换，不做局部修改。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAnchor {
    pub real_time_us: i64,
    pub media_time_us: i64,
}

impl TimeAnchor {
    pub fn deadline_us(&self, timestamp_us: i64) -> i64 {
        self.real_time_us + (timestamp_us - self.media_time_us)
    }
}

/// 视频定时使用的时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    /// 音频时钟：按音频已渲染样本推算
    Audio,
    /// 单调系统时钟：没有音频或音频已结束
    System,
    /// 向音频时钟缓慢靠拢的系统时钟
    DriftCorrected,
}

impl ClockKind {
    pub fn select(has_audio: bool, audio_eos: bool, drift_correction: bool) -> Self {
        if !has_audio || audio_eos {
            ClockKind::System
        } else if drift_correction {
            ClockKind::DriftCorrected
        } else {
            ClockKind::Audio
        }
    }

    /// 该时钟下音频上报的时间映射是否有效
    pub fn follows_audio(&self) -> bool {
        !matches!(self, ClockKind::System)
    }
}

/// 对一帧的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// 立即渲染
    Render { lateness_us: i64 },
    /// 太晚了，丢弃并马上解码下一帧
    Drop { lateness_us: i64 },
    /// 太早了，保留该帧，稍后再检查
    Early { lateness_us: i64, recheck_after_us: i64 },
}

/// ==================== 音画同步 ====================
///
/// 首帧、seek 完成、时钟切换时记录新的锚点，之后每帧计算
/// `lateness = now - deadline`：
/// - 迟到超过丢帧阈值 → 丢弃
/// - 提前超过重排阈值 → 延后再查，不忙等
/// - 其余 → 渲染
///
/// 音频上报的 (实时, 媒体) 映射优先于视频自己的锚点。
/// seek 后第一帧和实时传输模式下 lateness 强制为 0。
#[derive(Debug)]
pub struct ClockSynchronizer {
    drop_threshold_us: i64,
    early_threshold_us: i64,
    early_delay_us: i64,
    anchor: Option<TimeAnchor>,
    clock: Option<ClockKind>,
    force_on_time: bool,
    realtime: bool,
    rendered: u64,
    dropped: u64,
}

impl ClockSynchronizer {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            drop_threshold_us: config.frame_lateness_drop_threshold_us,
            early_threshold_us: config.frame_early_reschedule_us,
            early_delay_us: config.frame_early_delay_us,
            anchor: None,
            clock: None,
            force_on_time: false,
            realtime: false,
            rendered: 0,
            dropped: 0,
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.clock = None;
        self.force_on_time = false;
        self.realtime = false;
        self.rendered = 0;
        self.dropped = 0;
    }

    /// 实时传输（没有有意义的时间戳）：每帧到达即渲染
    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    /// 下一帧重新锚定（首帧、恢复播放）
    pub fn invalidate_anchor(&mut self) {
        self.anchor = None;
    }

    /// seek 完成：下一帧重新锚定并且按准时处理
    pub fn mark_seek(&mut self) {
        self.anchor = None;
        self.force_on_time = true;
    }

    pub fn anchor(&self) -> Option<TimeAnchor> {
        self.anchor
    }

    pub fn needs_anchor(&self) -> bool {
        self.anchor.is_none()
    }

    pub fn anchor_at(&mut self, now_real_us: i64, timestamp_us: i64) {
        let anchor = TimeAnchor {
            real_time_us: now_real_us,
            media_time_us: timestamp_us,
        };
        debug!("{} ⚓ 重新锚定: {:?}", log_ctx(), anchor);
        self.anchor = Some(anchor);
    }

    /// 记录当前使用的时钟；时钟发生切换时使锚点失效，返回是否切换
    pub fn observe_clock(&mut self, kind: ClockKind) -> bool {
        let changed = self.clock.map(|c| c != kind).unwrap_or(false);
        if changed {
            info!("{} 🕐 时钟切换: {:?} -> {:?}", log_ctx(), self.clock, kind);
            self.anchor = None;
        }
        self.clock = Some(kind);
        changed
    }

    pub fn clock(&self) -> Option<ClockKind> {
        self.clock
    }

    /// 音频给出的精确映射直接替换锚点
    pub fn apply_audio_mapping(&mut self, real_time_us: i64, media_time_us: i64) {
        self.anchor = Some(TimeAnchor {
            real_time_us,
            media_time_us,
        });
    }

    /// 计算一帧的处理结论
    pub fn evaluate(&mut self, now_real_us: i64, timestamp_us: i64) -> FrameVerdict {
        let anchor = match self.anchor {
            Some(anchor) => anchor,
            None => {
                self.anchor_at(now_real_us, timestamp_us);
                TimeAnchor {
                    real_time_us: now_real_us,
                    media_time_us: timestamp_us,
                }
            }
        };

        let mut lateness_us = now_real_us - anchor.deadline_us(timestamp_us);
        if self.force_on_time || self.realtime {
            self.force_on_time = false;
            lateness_us = 0;
        }

        if lateness_us > self.drop_threshold_us {
            self.dropped += 1;
            if self.dropped <= 5 || self.dropped % 100 == 0 {
                info!(
                    "{} 🗑️ 丢弃迟到帧 #{}: PTS={}us lateness={}us",
                    log_ctx(),
                    self.dropped,
                    timestamp_us,
                    lateness_us
                );
            }
            FrameVerdict::Drop { lateness_us }
        } else if lateness_us < -self.early_threshold_us {
            FrameVerdict::Early {
                lateness_us,
                recheck_after_us: self.early_delay_us,
            }
        } else {
            self.rendered += 1;
            FrameVerdict::Render { lateness_us }
        }
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualClock, TimeSource};

    fn sync() -> ClockSynchronizer {
        ClockSynchronizer::new(&PlayerConfig::default())
    }

    #[test]
    fn lockstep_clock_keeps_frames_on_time() {
        let clock = ManualClock::new(5_000_000);
        let start = clock.real_time_us();
        let mut sync = sync();
        for ts in [0i64, 33_000, 66_000, 99_000] {
            clock.set(start + ts);
            match sync.evaluate(clock.real_time_us(), ts) {
                FrameVerdict::Render { lateness_us } => assert!(lateness_us.abs() <= 1_000),
                other => panic!("frame {} not rendered: {:?}", ts, other),
            }
        }
        assert_eq!(sync.rendered_frames(), 4);
    }

    #[test]
    fn late_frames_are_dropped_and_early_frames_wait() {
        let mut sync = sync();
        sync.anchor_at(1_000_000, 0);
        assert_eq!(
            sync.evaluate(1_100_000, 33_000),
            FrameVerdict::Drop { lateness_us: 67_000 }
        );
        assert_eq!(
            sync.evaluate(1_000_000, 33_000),
            FrameVerdict::Early {
                lateness_us: -33_000,
                recheck_after_us: 10_000
            }
        );
        assert_eq!(
            sync.evaluate(1_025_000, 33_000),
            FrameVerdict::Render { lateness_us: -8_000 }
        );
        assert_eq!(
            sync.evaluate(1_093_000, 33_000),
            FrameVerdict::Render { lateness_us: 60_000 }
        );
        assert_eq!(sync.dropped_frames(), 1);
    }

    #[test]
    fn first_frame_after_seek_renders_immediately() {
        let mut sync = sync();
        sync.anchor_at(0, 0);
        sync.mark_seek();
        // 远远落后的时间戳也按准时处理，并以它重新锚定
        assert_eq!(
            sync.evaluate(9_000_000, 2_000_000),
            FrameVerdict::Render { lateness_us: 0 }
        );
        assert_eq!(
            sync.anchor(),
            Some(TimeAnchor {
                real_time_us: 9_000_000,
                media_time_us: 2_000_000
            })
        );
        assert_eq!(
            sync.evaluate(9_033_000, 2_033_000),
            FrameVerdict::Render { lateness_us: 0 }
        );
    }

    #[test]
    fn audio_mapping_is_authoritative() {
        let mut sync = sync();
        sync.anchor_at(0, 0);
        // 音频说：实时 500ms 时正在播放媒体 400ms
        sync.apply_audio_mapping(500_000, 400_000);
        assert_eq!(
            sync.evaluate(500_000, 400_000),
            FrameVerdict::Render { lateness_us: 0 }
        );
        assert!(matches!(sync.evaluate(500_000, 500_000), FrameVerdict::Early { .. }));
    }

    #[test]
    fn clock_switch_invalidates_anchor() {
        let mut sync = sync();
        assert_eq!(sync.clock(), None);
        assert!(!sync.observe_clock(ClockKind::Audio));
        sync.anchor_at(10, 10);
        assert!(!sync.observe_clock(ClockKind::Audio));
        assert!(!sync.needs_anchor());
        assert!(sync.observe_clock(ClockKind::System));
        assert!(sync.needs_anchor());
        assert_eq!(sync.clock(), Some(ClockKind::System));
    }

    #[test]
    fn realtime_mode_never_drops() {
        let mut sync = sync();
        sync.set_realtime(true);
        sync.anchor_at(0, 0);
        for i in 0..10 {
            assert_eq!(
                sync.evaluate(i * 1_000_000, i),
                FrameVerdict::Render { lateness_us: 0 }
            );
        }
    }

    #[test]
    fn clock_selection() {
        assert_eq!(ClockKind::select(true, false, false), ClockKind::Audio);
        assert_eq!(ClockKind::select(true, true, false), ClockKind::System);
        assert_eq!(ClockKind::select(false, false, true), ClockKind::System);
        assert_eq!(ClockKind::select(true, false, true), ClockKind::DriftCorrected);
    }
}
