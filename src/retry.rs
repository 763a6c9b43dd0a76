//! Bounded exponential backoff with jitter for transient adapter failures.

use rand::Rng;
use std::time::Duration;

/// Retry behavior for a single adapter call.
///
/// Delays double from `base_delay` on every retry, get up to `jitter` (a
/// fraction of the un-jittered delay) of random slack added so that concurrent
/// targets do not retry in lockstep, and are capped at `max_delay`. Below the
/// cap each delay is strictly longer than the previous one.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random slack as a fraction of the delay, in `[0.0, 0.5]`
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2u64.saturating_pow(exponent);
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let delay_ms = base_ms.saturating_mul(multiplier);

        let jitter_range = (delay_ms as f64 * self.jitter.clamp(0.0, 0.5)) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        let cap_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(delay_ms.saturating_add(jitter).min(cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = BackoffPolicy::default();

        let delay_1 = policy.delay_for(1);
        let delay_2 = policy.delay_for(2);
        let delay_3 = policy.delay_for(3);

        assert!(delay_1 >= Duration::from_millis(500));
        assert!(delay_1 < Duration::from_millis(625));
        assert!(delay_2 > delay_1);
        assert!(delay_3 > delay_2);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::default();
        assert!(policy.delay_for(20) <= Duration::from_secs(30));
        assert!(policy.delay_for(u32::MAX) <= Duration::from_secs(30));
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_attempt_bound() {
        let policy = BackoffPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
