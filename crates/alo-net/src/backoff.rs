//! Reconnect delay policy.

use std::time::Duration;

use rand::Rng;

/// Exponential reconnect backoff with optional jitter and a retry ceiling.
///
/// `delay(n) = min(initial * 2^(n-1), max)` for attempt `n` (1-indexed).
/// With jitter the delay is drawn uniformly from `[delay/2, delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// A fixed delay retried forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            max_attempts: 0,
            jitter: false,
        }
    }

    /// Backoff for attempt `n` before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(multiplier).min(max_ms))
    }

    /// Delay to wait before attempt `n`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let full = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        if full < 2 {
            return base;
        }
        Duration::from_millis(rand::thread_rng().gen_range(full / 2..=full))
    }

    /// Whether attempt `n` is past the retry ceiling.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectPolicy {
        ReconnectPolicy {
            jitter: false,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = no_jitter();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let policy = no_jitter();
        assert_eq!(policy.delay(6), Duration::from_secs(30));
        assert_eq!(policy.delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_zero_attempt_is_initial() {
        assert_eq!(no_jitter().delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=8 {
            let base = policy.base_delay(attempt);
            for _ in 0..20 {
                let d = policy.delay(attempt);
                assert!(d <= base, "{d:?} > {base:?}");
                assert!(d >= base / 2, "{d:?} < half of {base:?}");
            }
        }
    }

    #[test]
    fn test_fixed_policy_never_exhausts() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(1));
        assert_eq!(policy.delay(7), Duration::from_secs(1));
        assert!(!policy.exhausted(10_000));
    }

    #[test]
    fn test_exhausted_after_ceiling() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(10));
        assert!(policy.exhausted(11));
    }
}
