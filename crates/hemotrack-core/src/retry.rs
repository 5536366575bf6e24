//! Bounded retry with exponential backoff and jitter.
//!
//! Used by fetcher implementations: transient failures are retried inside
//! the fetch call and never surface past it unless attempts are exhausted;
//! permanent failures end the loop immediately.

use std::time::Duration;

/// Backoff schedule for transient fetch failures.
///
/// Delay doubles per attempt from `base_delay`, capped at `max_delay`,
/// with uniform random jitter in `[0, jitter]` added on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    /// 500ms base, 30s cap, 250ms jitter.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Deterministic backoff for a given attempt number (1-indexed),
    /// before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    /// Backoff for an attempt with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        base + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// xorshift64 seeded from the high-resolution clock.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
