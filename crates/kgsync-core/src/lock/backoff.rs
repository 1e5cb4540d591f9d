//! Retry spacing for lock acquisition

use std::time::Duration;

/// Adaptive sleep between acquisition attempts
///
/// Waits `max(min_interval, remaining / divisor)`, clamped to `remaining`,
/// so retries become finer as the deadline approaches and a waiter never
/// sleeps past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_interval: Duration,
    pub divisor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            divisor: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(min_interval: Duration, divisor: u32) -> Self {
        Self {
            min_interval,
            divisor: divisor.max(1),
        }
    }

    /// Sleep before the next attempt, given the time left until the deadline
    pub fn interval(&self, remaining: Duration) -> Duration {
        (remaining / self.divisor.max(1))
            .max(self.min_interval)
            .min(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_scales_with_remaining() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.interval(Duration::from_secs(10)),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.interval(Duration::from_secs(5)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_interval_floor_and_deadline_clamp() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.interval(Duration::from_millis(800)),
            Duration::from_millis(100)
        );
        assert_eq!(
            policy.interval(Duration::from_millis(40)),
            Duration::from_millis(40)
        );
        assert_eq!(policy.interval(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_zero_divisor_is_clamped() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 0);
        assert_eq!(policy.divisor, 1);
        assert_eq!(
            policy.interval(Duration::from_millis(50)),
            Duration::from_millis(50)
        );
    }
}
