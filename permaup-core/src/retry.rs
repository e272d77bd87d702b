use std::time::Duration;

/// Bounded retry with exponential backoff for one chunk.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated per chunk before aborting.
    pub max_retries: u32,
    /// Consecutive identical server rejections tolerated per chunk.
    pub max_rejections: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_rejections: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; handy in tests.
    pub fn immediate(max_retries: u32, max_rejections: u32) -> Self {
        Self {
            max_retries,
            max_rejections,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
