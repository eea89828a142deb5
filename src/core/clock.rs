use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 实时时间源（微秒），返回值单调不减
pub trait TimeSource: Send + Sync {
    fn real_time_us(&self) -> i64;
}

/// 系统时钟 - 基于单调时钟 `Instant`
#[derive(Clone, Debug)]
pub struct SystemTimeSource {
    start: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn real_time_us(&self) -> i64 {
        self.start.elapsed().as_micros() as i64
    }
}

/// 漂移校正时钟
///
/// 以系统时钟为基础，每次校正只向音频时钟靠拢一小步，
/// 吸收音频硬件延迟带来的缓慢漂移而不产生可见跳变
pub struct DriftCorrectedClock {
    base: SystemTimeSource,
    max_step_us: i64,
    inner: Mutex<DriftInner>,
}

struct DriftInner {
    offset_us: i64,
    last_us: i64,
}

impl DriftCorrectedClock {
    pub fn new(max_step_us: i64) -> Self {
        Self {
            base: SystemTimeSource::new(),
            max_step_us: max_step_us.max(0),
            inner: Mutex::new(DriftInner {
                offset_us: 0,
                last_us: 0,
            }),
        }
    }

    /// 向目标时间（音频时钟的"现在"）靠拢，单步不超过 `max_step_us`
    pub fn nudge_toward(&self, target_us: i64) {
        let mut inner = self.inner.lock();
        let current = self.base.real_time_us() + inner.offset_us;
        let step = (target_us - current).clamp(-self.max_step_us, self.max_step_us);
        inner.offset_us += step;
    }

    /// 直接对齐到目标时间（重新锚定时使用），同时重置单调基准
    pub fn align_to(&self, target_us: i64) {
        let mut inner = self.inner.lock();
        inner.offset_us = target_us - self.base.real_time_us();
        inner.last_us = target_us;
    }

    pub fn offset_us(&self) -> i64 {
        self.inner.lock().offset_us
    }
}

impl TimeSource for DriftCorrectedClock {
    fn real_time_us(&self) -> i64 {
        let mut inner = self.inner.lock();
        let now = (self.base.real_time_us() + inner.offset_us).max(inner.last_us);
        inner.last_us = now;
        now
    }
}

/// 手动时钟：时间只在调用 `advance`/`set` 时前进
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: Arc::new(AtomicI64::new(start_us)),
        }
    }

    pub fn advance(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us.max(0), Ordering::SeqCst);
    }

    pub fn set(&self, now_us: i64) {
        self.now_us.fetch_max(now_us, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn real_time_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemTimeSource::new();
        let a = clock.real_time_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.real_time_us();
        assert!(b >= a + 1_000);
    }

    #[test]
    fn drift_correction_moves_in_bounded_steps() {
        let clock = DriftCorrectedClock::new(500);
        clock.nudge_toward(clock.real_time_us() + 10_000);
        assert_eq!(clock.offset_us(), 500);
        clock.nudge_toward(clock.real_time_us() + 10_000);
        assert_eq!(clock.offset_us(), 1_000);
    }

    #[test]
    fn drift_correction_never_runs_backwards() {
        let clock = DriftCorrectedClock::new(50_000);
        let before = clock.real_time_us();
        clock.nudge_toward(before - 1_000_000);
        assert!(clock.real_time_us() >= before);
    }

    #[test]
    fn manual_clock_only_moves_forward() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        clock.set(200);
        assert_eq!(clock.real_time_us(), 1_500);
        clock.set(5_000);
        assert_eq!(clock.real_time_us(), 5_000);
    }
}
