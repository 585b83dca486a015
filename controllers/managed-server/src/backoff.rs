//! # Exponential Backoff
//!
//! Retry delays for failed reconcile attempts: `base * 2^(n-1)` for the n-th
//! consecutive failure, capped at `max`. Failure counts are tracked per object and
//! cleared on the next successful attempt.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry following `failures` consecutive failures (1-indexed).
    ///
    /// A count of zero is treated as the first failure.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Consecutive-failure counts per object key (`namespace/name`)
#[derive(Debug)]
pub struct BackoffTracker {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<String, u32>>,
}

impl BackoffTracker {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure for `key` and returns how long to wait before retrying.
    pub fn record_failure(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.backoff.delay_for(*count)
    }

    /// Longest delay the tracker ever hands out.
    pub fn max_delay(&self) -> Duration {
        self.backoff.max
    }

    /// Forgets the failure history of `key`.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Current consecutive-failure count for `key`.
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_exponential_sequence() {
        let backoff = ExponentialBackoff::new(secs(5), secs(300));

        assert_eq!(backoff.delay_for(1), secs(5));
        assert_eq!(backoff.delay_for(2), secs(10));
        assert_eq!(backoff.delay_for(3), secs(20));
        assert_eq!(backoff.delay_for(4), secs(40));
        assert_eq!(backoff.delay_for(5), secs(80));
        assert_eq!(backoff.delay_for(6), secs(160));
        assert_eq!(backoff.delay_for(7), secs(300)); // 320s capped
    }

    #[test]
    fn test_max_cap_holds_for_large_counts() {
        let backoff = ExponentialBackoff::new(secs(5), secs(300));
        assert_eq!(backoff.delay_for(64), secs(300));
        assert_eq!(backoff.delay_for(u32::MAX), secs(300));
        assert_eq!(backoff.delay_for(0), secs(5));
    }

    #[test]
    fn test_tracker_grows_per_key_and_resets() {
        let tracker = BackoffTracker::new(ExponentialBackoff::new(secs(5), secs(300)));

        assert_eq!(tracker.record_failure("default/a"), secs(5));
        assert_eq!(tracker.record_failure("default/a"), secs(10));
        assert_eq!(tracker.record_failure("default/b"), secs(5));
        assert_eq!(tracker.failures("default/a"), 2);

        tracker.reset("default/a");

        // Should restart from the base after success
        assert_eq!(tracker.failures("default/a"), 0);
        assert_eq!(tracker.record_failure("default/a"), secs(5));
        assert_eq!(tracker.failures("default/b"), 1);
    }
}
