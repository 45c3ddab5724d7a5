//! Exponential backoff with jitter for retried manager calls.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`, plus up to 20% jitter so
    /// concurrent retries from many processors don't stampede in lockstep.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis());
        let jitter_fraction = fastrand::f64() * 0.2;
        let jittered = capped as f64 * (1.0 + jitter_fraction);
        Duration::from_millis(jittered.round() as u64)
    }
}
