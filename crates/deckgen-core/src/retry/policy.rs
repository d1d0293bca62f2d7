use std::time::Duration;

use rand::RngExt;

use super::error::TaskError;

/// Upper bound of the random jitter, as a fraction of the computed delay.
const JITTER_RATIO: f64 = 0.1;

/// Decision returned by the backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a ceiling and optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// `min(base × multiplier^(attempt−1), cap)`. `attempt` is 1-based; 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1) - 1;
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as f64;
        let cap_ms = self.max_delay.as_millis().min(u64::MAX as u128) as f64;
        // powi saturates to infinity for large exponents; min() keeps the cap.
        let raw_ms = base_ms * multiplier.powi(exp.min(1_024) as i32);
        let delay = Duration::from_millis(raw_ms.min(cap_ms).max(0.0).round() as u64);
        if self.jitter {
            self.apply_jitter(delay)
        } else {
            delay
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
        let span = ((delay_ms as f64) * JITTER_RATIO).floor() as u64;
        if span == 0 {
            return delay;
        }
        let extra = rand::rng().random_range(0..=span);
        Duration::from_millis(delay_ms.saturating_add(extra)).min(self.max_delay.max(delay))
    }

    /// Decide whether `error`, seen on attempt `attempt` (1-based), should be retried.
    ///
    /// Returns `NoRetry` once `attempt` reaches `max_attempts` so the error is surfaced.
    pub fn decide(&self, attempt: u32, error: &TaskError) -> RetryDecision {
        if !error.retryable || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay(attempt))
    }
}
