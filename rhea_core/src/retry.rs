//! Retry with bounded exponential backoff.
//!
//! Transient infrastructure errors (unreachable store or index, exhausted
//! slots, timeouts) are retried with exponentially growing delays capped at
//! a maximum; everything else fails immediately. Classification rides on
//! [`RheaError::is_recoverable`], so the policy lives in one place.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, RheaError};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the per-attempt delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay on each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay for a given retry attempt (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_factor.powi(attempt as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * multiplier;
        std::cmp::min(Duration::from_millis(delay_ms as u64), self.max_delay)
    }
}

/// Run `operation`, retrying recoverable failures per `config`.
pub async fn execute_with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total_attempts = 1 + config.max_retries;
    let mut last_error: Option<RheaError> = None;

    for attempt in 0..total_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_recoverable() => return Err(err),
            Err(err) => {
                let remaining = total_attempts - attempt - 1;
                if remaining == 0 {
                    last_error = Some(err);
                    break;
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    remaining,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying recoverable failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or(RheaError::Cancelled))
}
