use super::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 播放器配置
///
/// 所有水位线、时序阈值集中在这里，构造一次后传给各个组件。
/// 字段名与 JSON 配置一致（camelCase），缺省字段取默认值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerConfig {
    /// 低水位（微秒）：播放中缓存时长低于它进入缓冲
    pub low_watermark_us: i64,
    /// 高水位（微秒）：缓冲中缓存时长超过它恢复播放
    pub high_watermark_us: i64,
    /// 起播水位（微秒）：仅在准备阶段使用，实时源更快起播
    pub start_low_watermark_us: i64,
    /// 无法估算码率时使用的字节水位
    pub low_watermark_bytes: u64,
    pub high_watermark_bytes: u64,
    /// 缓冲检查周期
    pub buffering_check_interval_us: i64,
    /// 迟到超过该值的视频帧直接丢弃
    pub frame_lateness_drop_threshold_us: i64,
    /// 提前超过该值的视频帧延后再检查
    pub frame_early_reschedule_us: i64,
    /// 提前帧的重新检查延迟
    pub frame_early_delay_us: i64,
    /// 渲染一帧后下一次视频事件的间隔
    pub video_event_interval_us: i64,
    /// 音频状态（seek 完成 / EOS）轮询间隔
    pub audio_status_check_interval_us: i64,
    /// 有音频时视频是否使用漂移校正的系统时钟
    pub drift_correction: bool,
    /// 漂移校正单步上限
    pub drift_max_step_us: i64,
    /// stop/reset 等待数据源响应断开的上限，超时后强制放弃准备
    pub prepare_cancel_timeout_us: i64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            low_watermark_us: 2_000_000,
            high_watermark_us: 5_000_000,
            start_low_watermark_us: 1_000_000,
            low_watermark_bytes: 40_000,
            high_watermark_bytes: 200_000,
            buffering_check_interval_us: 1_000_000,
            frame_lateness_drop_threshold_us: 60_000,
            frame_early_reschedule_us: 10_000,
            frame_early_delay_us: 10_000,
            video_event_interval_us: 10_000,
            audio_status_check_interval_us: 100_000,
            drift_correction: false,
            drift_max_step_us: 1_000,
            prepare_cancel_timeout_us: 5_000_000,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 字符串加载
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)
            .map_err(|e| PlayerError::InvalidArgument(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.low_watermark_us <= 0 || self.high_watermark_us <= self.low_watermark_us {
            return Err(PlayerError::InvalidArgument(format!(
                "水位线无效: low={} high={}",
                self.low_watermark_us, self.high_watermark_us
            )));
        }
        if self.start_low_watermark_us <= 0 || self.start_low_watermark_us > self.high_watermark_us {
            return Err(PlayerError::InvalidArgument(format!(
                "起播水位无效: {}",
                self.start_low_watermark_us
            )));
        }
        if self.high_watermark_bytes <= self.low_watermark_bytes {
            return Err(PlayerError::InvalidArgument(format!(
                "字节水位无效: low={} high={}",
                self.low_watermark_bytes, self.high_watermark_bytes
            )));
        }
        let positive = [
            ("bufferingCheckIntervalUs", self.buffering_check_interval_us),
            ("frameLatenessDropThresholdUs", self.frame_lateness_drop_threshold_us),
            ("frameEarlyRescheduleUs", self.frame_early_reschedule_us),
            ("frameEarlyDelayUs", self.frame_early_delay_us),
            ("videoEventIntervalUs", self.video_event_interval_us),
            ("audioStatusCheckIntervalUs", self.audio_status_check_interval_us),
            ("prepareCancelTimeoutUs", self.prepare_cancel_timeout_us),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(PlayerError::InvalidArgument(format!("{} 必须为正数: {}", name, value)));
            }
        }
        Ok(())
    }

    /// 高低水位的中点，用于缓冲百分比和非实时源的起播判断
    ///
    /// 按 `low + (high - low) / 2` 计算，水位接近类型上限时也不会溢出
    pub fn midpoint_watermark_us(&self) -> i64 {
        self.low_watermark_us + (self.high_watermark_us - self.low_watermark_us) / 2
    }

    pub fn midpoint_watermark_bytes(&self) -> u64 {
        self.low_watermark_bytes + self.high_watermark_bytes.saturating_sub(self.low_watermark_bytes) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.buffering_check_interval_us, 1_000_000);
        assert_eq!(config.frame_lateness_drop_threshold_us, 60_000);
        assert_eq!(config.midpoint_watermark_us(), 3_500_000);
    }

    #[test]
    fn midpoints_of_huge_watermarks() {
        let config = PlayerConfig {
            low_watermark_us: i64::MAX - 10,
            high_watermark_us: i64::MAX,
            start_low_watermark_us: 1,
            low_watermark_bytes: u64::MAX - 100,
            high_watermark_bytes: u64::MAX,
            ..PlayerConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.midpoint_watermark_us(), i64::MAX - 5);
        assert_eq!(config.midpoint_watermark_bytes(), u64::MAX - 50);
        assert_eq!(PlayerConfig::default().midpoint_watermark_bytes(), 120_000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "lowWatermarkUs": 1000000, "highWatermarkUs": 4000000, "driftCorrection": true }"#,
        )
        .unwrap();
        assert_eq!(config.low_watermark_us, 1_000_000);
        assert_eq!(config.high_watermark_us, 4_000_000);
        assert!(config.drift_correction);
        assert_eq!(config.frame_early_delay_us, 10_000);
    }

    #[test]
    fn rejects_inverted_watermarks() {
        let err = PlayerConfig::from_json_str(r#"{ "lowWatermarkUs": 6000000 }"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(PlayerConfig::from_json_str("not json").is_err());
        assert!(PlayerConfig::from_json_str(r#"{ "frameEarlyDelayUs": 0 }"#).is_err());
    }
}
