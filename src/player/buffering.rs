use super::source::CacheStatus;
use crate::core::{log_ctx, PlayerConfig};
use log::{debug, info};

/// 缓冲检查时会话所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingPhase {
    /// 正在准备：缓存够起播水位就提前完成准备
    Preparing,
    /// 用户意图为播放（包括缓存不足导致的内部暂停）
    Started,
    /// 暂停、已准备等，只做统计不改变状态
    Inactive,
}

/// 缓冲检查给出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingAction {
    None,
    /// 进入缓冲（内部暂停）
    EnterUnderrun,
    /// 缓冲完成（内部恢复）
    LeaveUnderrun,
    /// 准备阶段缓存已足够，结束异步准备
    FinishPrepare,
}

/// 一次缓冲检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferingDecision {
    pub action: BufferingAction,
    /// 估算的已缓存时长（无法估算时为 None，此时使用字节水位）
    pub cached_duration_us: Option<i64>,
    /// 需要上报的缓冲百分比
    pub report_percentage: Option<i32>,
}

/// 同一套滞回规则下的水位（时长或字节）
#[derive(Debug, Clone, Copy)]
struct Levels {
    level: i64,
    low: i64,
    high: i64,
    start: i64,
    mid: i64,
}

/// 缓冲控制器
///
/// 根据数据源上报的缓存情况做水位线流控：
/// - 播放中缓存低于低水位 → 进入缓冲
/// - 缓冲中缓存高于高水位（或数据源到达末尾）→ 恢复播放
/// - 准备阶段缓存超过起播水位 → 提前完成准备
///
/// 介于高低水位之间时保持原状态，不会来回抖动。
#[derive(Debug)]
pub struct BufferingController {
    config: PlayerConfig,
    underrun: bool,
    last_percentage: Option<i32>,
    eos_reported: bool,
}

impl BufferingController {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            config: config.clone(),
            underrun: false,
            last_percentage: None,
            eos_reported: false,
        }
    }

    /// 会话停止/重置时调用
    pub fn reset(&mut self) {
        self.underrun = false;
        self.last_percentage = None;
        self.eos_reported = false;
    }

    pub fn is_underrun(&self) -> bool {
        self.underrun
    }

    /// 用户暂停/seek 时清除缓冲标记
    pub fn clear_underrun(&mut self) {
        self.underrun = false;
    }

    /// seek 之后数据源可能重新开始下载，允许再次上报 EOS 的 100%
    pub fn rearm_eos_report(&mut self) {
        self.eos_reported = false;
    }

    pub fn last_percentage(&self) -> Option<i32> {
        self.last_percentage
    }

    /// 估算整体码率（bit/s）
    ///
    /// 优先用容器大小和时长计算；否则累加各轨道声明的码率（任一轨道未声明则放弃）
    pub fn estimate_bitrate(
        track_bitrates: &[Option<i64>],
        file_size: Option<u64>,
        duration_us: Option<i64>,
    ) -> Option<i64> {
        if let (Some(size), Some(duration)) = (file_size, duration_us) {
            if size > 0 && duration > 0 {
                return Some((size as i128 * 8_000_000 / duration as i128) as i64);
            }
        }
        if track_bitrates.is_empty() {
            return None;
        }
        let mut total: i64 = 0;
        for bitrate in track_bitrates {
            match bitrate {
                Some(b) if *b > 0 => total += *b,
                _ => return None,
            }
        }
        Some(total)
    }

    /// 已缓存时长：数据源直接上报的优先，否则按码率估算
    pub fn cached_duration_us(status: &CacheStatus, bitrate: Option<i64>) -> Option<i64> {
        if let Some(duration) = status.cached_duration_us {
            return Some(duration.max(0));
        }
        match bitrate {
            Some(b) if b > 0 => Some((status.cached_bytes as i128 * 8_000_000 / b as i128) as i64),
            _ => None,
        }
    }

    /// 缓存百分比：相对高低水位中点
    pub fn percentage(level: i64, mid: i64) -> i32 {
        if mid <= 0 {
            return 100;
        }
        (level.max(0) as i128 * 100 / mid as i128).clamp(0, 100) as i32
    }

    /// 执行一次缓冲检查
    pub fn evaluate(
        &mut self,
        phase: BufferingPhase,
        status: &CacheStatus,
        bitrate: Option<i64>,
        live: bool,
    ) -> BufferingDecision {
        let cached_duration_us = Self::cached_duration_us(status, bitrate);
        let levels = match cached_duration_us {
            Some(cached) => {
                let mid = self.config.midpoint_watermark_us();
                Levels {
                    level: cached,
                    low: self.config.low_watermark_us,
                    high: self.config.high_watermark_us,
                    start: if live { self.config.start_low_watermark_us } else { mid },
                    mid,
                }
            }
            None => {
                // 码率未知，退回字节水位
                let mid = self.config.midpoint_watermark_bytes() as i64;
                Levels {
                    level: status.cached_bytes.min(i64::MAX as u64) as i64,
                    low: self.config.low_watermark_bytes as i64,
                    high: self.config.high_watermark_bytes as i64,
                    start: mid,
                    mid,
                }
            }
        };

        let percentage = if status.eos { 100 } else { Self::percentage(levels.level, levels.mid) };
        self.last_percentage = Some(percentage);

        let was_underrun = self.underrun;
        let action = match phase {
            BufferingPhase::Preparing => {
                if status.eos || levels.level > levels.start {
                    info!(
                        "{} 🚀 起播缓存已足够（{} / {}，eos={}），结束准备",
                        log_ctx(),
                        levels.level,
                        levels.start,
                        status.eos
                    );
                    BufferingAction::FinishPrepare
                } else {
                    BufferingAction::None
                }
            }
            BufferingPhase::Started => {
                if !self.underrun && !status.eos && levels.level < levels.low {
                    info!(
                        "{} 🔄 开始缓冲（当前: {} / 低水位: {}）",
                        log_ctx(),
                        levels.level,
                        levels.low
                    );
                    self.underrun = true;
                    BufferingAction::EnterUnderrun
                } else if self.underrun && (status.eos || levels.level > levels.high) {
                    info!(
                        "{} ✅ 缓冲完成（当前: {} / 高水位: {}，eos={}）",
                        log_ctx(),
                        levels.level,
                        levels.high,
                        status.eos
                    );
                    self.underrun = false;
                    BufferingAction::LeaveUnderrun
                } else {
                    BufferingAction::None
                }
            }
            BufferingPhase::Inactive => {
                self.underrun = false;
                BufferingAction::None
            }
        };

        let report_percentage = if status.eos {
            if self.eos_reported {
                None
            } else {
                self.eos_reported = true;
                Some(100)
            }
        } else if was_underrun || self.underrun {
            Some(percentage)
        } else {
            None
        };

        debug!(
            "{} 📊 缓冲检查: phase={:?} level={} ({}) {}% action={:?}",
            log_ctx(),
            phase,
            levels.level,
            if cached_duration_us.is_some() { "us" } else { "bytes" },
            percentage,
            action
        );

        BufferingDecision {
            action,
            cached_duration_us,
            report_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlayerConfig {
        PlayerConfig::default()
    }

    fn reported(duration_us: i64) -> CacheStatus {
        CacheStatus {
            cached_bytes: 0,
            cached_duration_us: Some(duration_us),
            eos: false,
        }
    }

    #[test]
    fn hysteresis_only_flips_on_crossings() {
        let mut ctl = BufferingController::new(&config());
        let drive = [
            (6_000_000, BufferingAction::None),
            (3_000_000, BufferingAction::None),
            (1_999_999, BufferingAction::EnterUnderrun),
            (1_000_000, BufferingAction::None),
            (3_000_000, BufferingAction::None),
            (4_999_999, BufferingAction::None),
            (5_000_000, BufferingAction::None),
            (5_000_001, BufferingAction::LeaveUnderrun),
            (3_000_000, BufferingAction::None),
            (2_000_000, BufferingAction::None),
            (1_500_000, BufferingAction::EnterUnderrun),
        ];
        for (level, expected) in drive {
            let decision = ctl.evaluate(BufferingPhase::Started, &reported(level), None, false);
            assert_eq!(decision.action, expected, "level {}", level);
        }
        assert!(ctl.is_underrun());
    }

    #[test]
    fn hovering_between_watermarks_never_oscillates() {
        let mut ctl = BufferingController::new(&config());
        ctl.evaluate(BufferingPhase::Started, &reported(1_000_000), None, false);
        assert!(ctl.is_underrun());
        for i in 0..50 {
            let level = 2_500_000 + (i % 7) * 300_000;
            let decision = ctl.evaluate(BufferingPhase::Started, &reported(level), None, false);
            assert_eq!(decision.action, BufferingAction::None);
            assert!(ctl.is_underrun());
        }
    }

    #[test]
    fn eos_leaves_underrun_and_reports_full_once() {
        let mut ctl = BufferingController::new(&config());
        ctl.evaluate(BufferingPhase::Started, &reported(0), None, false);
        let eos = CacheStatus {
            cached_bytes: 10,
            cached_duration_us: Some(100),
            eos: true,
        };
        let first = ctl.evaluate(BufferingPhase::Started, &eos, None, false);
        assert_eq!(first.action, BufferingAction::LeaveUnderrun);
        assert_eq!(first.report_percentage, Some(100));
        let second = ctl.evaluate(BufferingPhase::Started, &eos, None, false);
        assert_eq!(second.action, BufferingAction::None);
        assert_eq!(second.report_percentage, None);
    }

    #[test]
    fn percentage_is_reported_only_while_underrun() {
        let mut ctl = BufferingController::new(&config());
        assert_eq!(ctl.last_percentage(), None);
        let healthy = ctl.evaluate(BufferingPhase::Started, &reported(4_000_000), None, false);
        assert_eq!(healthy.report_percentage, None);
        assert_eq!(healthy.cached_duration_us, Some(4_000_000));
        // 未上报也会记下
        assert_eq!(ctl.last_percentage(), Some(100));
        let starving = ctl.evaluate(BufferingPhase::Started, &reported(700_000), None, false);
        // 700ms / 3.5s = 20%
        assert_eq!(starving.report_percentage, Some(20));
        assert_eq!(ctl.last_percentage(), Some(20));
        ctl.reset();
        assert_eq!(ctl.last_percentage(), None);
    }

    #[test]
    fn estimates_duration_from_bitrate() {
        let status = CacheStatus {
            cached_bytes: 250_000,
            cached_duration_us: None,
            eos: false,
        };
        // 1 Mbit/s → 250KB = 2s
        assert_eq!(
            BufferingController::cached_duration_us(&status, Some(1_000_000)),
            Some(2_000_000)
        );
        assert_eq!(BufferingController::cached_duration_us(&status, None), None);
    }

    #[test]
    fn bitrate_prefers_container_size() {
        let from_size = BufferingController::estimate_bitrate(
            &[Some(64_000), Some(500_000)],
            Some(5_000_000),
            Some(10_000_000),
        );
        assert_eq!(from_size, Some(4_000_000));
        let from_tracks =
            BufferingController::estimate_bitrate(&[Some(64_000), Some(500_000)], None, None);
        assert_eq!(from_tracks, Some(564_000));
        assert_eq!(
            BufferingController::estimate_bitrate(&[Some(64_000), None], None, Some(1)),
            None
        );
    }

    #[test]
    fn falls_back_to_byte_watermarks() {
        let mut ctl = BufferingController::new(&config());
        let bytes = |n: u64| CacheStatus {
            cached_bytes: n,
            cached_duration_us: None,
            eos: false,
        };
        let starving = ctl.evaluate(BufferingPhase::Started, &bytes(39_999), None, false);
        assert_eq!(starving.action, BufferingAction::EnterUnderrun);
        assert_eq!(starving.cached_duration_us, None);
        // 39_999 / 120_000
        assert_eq!(starving.report_percentage, Some(33));
        assert_eq!(ctl.last_percentage(), Some(33));
        assert_eq!(
            ctl.evaluate(BufferingPhase::Started, &bytes(150_000), None, false).action,
            BufferingAction::None
        );
        assert_eq!(
            ctl.evaluate(BufferingPhase::Started, &bytes(200_001), None, false).action,
            BufferingAction::LeaveUnderrun
        );
    }

    #[test]
    fn live_sources_start_at_the_lower_threshold() {
        let mut ctl = BufferingController::new(&config());
        let level = reported(1_200_000);
        assert_eq!(
            ctl.evaluate(BufferingPhase::Preparing, &level, None, true).action,
            BufferingAction::FinishPrepare
        );
        assert_eq!(
            ctl.evaluate(BufferingPhase::Preparing, &level, None, false).action,
            BufferingAction::None
        );
        assert_eq!(
            ctl.evaluate(BufferingPhase::Preparing, &reported(3_600_000), None, false).action,
            BufferingAction::FinishPrepare
        );
    }

    #[test]
    fn live_edge_with_zero_queue_does_not_finish_prepare() {
        let mut ctl = BufferingController::new(&config());
        for _ in 0..10 {
            let decision = ctl.evaluate(BufferingPhase::Preparing, &reported(0), None, true);
            assert_eq!(decision.action, BufferingAction::None);
        }
    }
}
