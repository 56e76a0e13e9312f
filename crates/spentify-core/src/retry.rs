//! Redelivery backoff.

use std::time::Duration;

use crate::rng::DeterministicRng;

/// Exponential, capped, jittered backoff for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any delay.
    pub max_backoff: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Relative jitter; 0.2 spreads delays over ±20%.
    pub jitter: f64,
    /// Attempts after which a message is dead-lettered. `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivering a message whose `attempt`-th delivery
    /// failed.
    #[must_use]
    pub fn backoff(&self, attempt: u32, rng: &mut dyn DeterministicRng) -> Duration {
        let max = self.max_backoff.as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if base.is_finite() { base.min(max) } else { max };
        let spread = self.jitter.clamp(0.0, 1.0) * (2.0 * rng.next_f64() - 1.0);
        let jittered = (capped * (1.0 + spread)).max(0.0).min(max);
        Duration::from_secs_f64(jittered)
    }

    /// Whether a message that failed on its `attempt`-th delivery should be
    /// dead-lettered instead of retried.
    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl DeterministicRng for Fixed {
        fn next_f64(&mut self) -> f64 {
            self.0
        }
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = no_jitter();
        let mut rng = Fixed(0.5);

        assert_eq!(policy.backoff(1, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.backoff(2, &mut rng), Duration::from_millis(400));
        assert_eq!(policy.backoff(4, &mut rng), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = no_jitter();

        let delay = policy.backoff(u32::MAX, &mut Fixed(0.5));

        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_spreads_around_base() {
        let policy = RetryPolicy::default();

        let low = policy.backoff(1, &mut Fixed(0.0));
        let mid = policy.backoff(1, &mut Fixed(0.5));
        let high = policy.backoff(1, &mut Fixed(0.999));

        assert_eq!(mid, Duration::from_millis(200));
        assert!(low >= Duration::from_millis(159) && low <= Duration::from_millis(161));
        assert!(high > mid && high <= Duration::from_millis(240));
    }

    #[test]
    fn test_unbounded_policy_never_exhausts() {
        assert!(!RetryPolicy::default().exhausted(u32::MAX));
    }

    #[test]
    fn test_bounded_policy_exhausts_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };

        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
