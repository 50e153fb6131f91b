//! Host sleep detection.
//!
//! A low-frequency timer ticks every few seconds. If two consecutive ticks
//! are much further apart than that, the process was most likely suspended
//! and any open connection is probably dead. Ticks must be stamped with
//! wall-clock time: monotonic clocks stop while the host sleeps.

use std::time::Duration;

/// Interval between sleep-check ticks.
pub const DEFAULT_SLEEP_CHECK: Duration = Duration::from_secs(5);

/// Gap between ticks that counts as a wake-up.
pub const DEFAULT_SLEEP_THRESHOLD: Duration = Duration::from_secs(30);

/// Compares consecutive tick timestamps against a threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepDetector {
    threshold_ms: u64,
    last_ms: Option<u64>,
}

impl SleepDetector {
    /// Create a detector that fires when ticks are more than `threshold` apart.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_ms: threshold.as_millis() as u64,
            last_ms: None,
        }
    }

    /// Record a tick at `now_ms` (milliseconds since the Unix epoch).
    ///
    /// Returns true when the gap since the previous tick exceeds the threshold.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let woken = self
            .last_ms
            .is_some_and(|last| now_ms.saturating_sub(last) > self.threshold_ms);
        self.last_ms = Some(now_ms);
        woken
    }

    /// Forget the previous tick.
    pub fn reset(&mut self) {
        self.last_ms = None;
    }
}

impl Default for SleepDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SLEEP_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_never_wakes() {
        let mut detector = SleepDetector::default();
        assert!(!detector.tick(1_000_000));
    }

    #[test]
    fn regular_ticks_do_not_wake() {
        let mut detector = SleepDetector::default();
        let mut now = 1_000_000;
        for _ in 0..10 {
            assert!(!detector.tick(now));
            now += 5_000;
        }
    }

    #[test]
    fn forty_second_gap_wakes() {
        let mut detector = SleepDetector::new(Duration::from_secs(30));
        detector.tick(1_000_000);
        assert!(detector.tick(1_040_000));
    }

    #[test]
    fn gap_equal_to_threshold_does_not_wake() {
        let mut detector = SleepDetector::new(Duration::from_secs(30));
        detector.tick(0);
        assert!(!detector.tick(30_000));
    }

    #[test]
    fn reset_forgets_last_tick() {
        let mut detector = SleepDetector::default();
        detector.tick(0);
        detector.reset();
        assert!(!detector.tick(100_000));
    }

    #[test]
    fn clock_going_backwards_does_not_wake() {
        let mut detector = SleepDetector::default();
        detector.tick(100_000);
        assert!(!detector.tick(10_000));
    }
}
