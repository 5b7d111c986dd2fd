//! Exponential backoff for transient stage failures

use std::time::Duration;

use ferry_core::RetryConfig;
use rand::Rng;

/// Hard cap on the exponent so the shift below cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Deterministic part of the backoff after attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, jittered and never shorter than `retry_after`
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff(attempt);
        if !self.jitter.is_zero() {
            let jitter_ms = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        match retry_after {
            Some(minimum) if minimum > delay => minimum,
            _ => delay,
        }
    }
}
