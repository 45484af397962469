use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), in `[cap/2, cap]` where
    /// `cap = min(base * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);

        if cap_ms < 2 {
            return Duration::from_millis(cap_ms);
        }

        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(cap_ms / 2..=cap_ms))
    }
}
