//! Retry policy.
//!
//! # Responsibilities
//! - Bound the number of attempts per upstream call
//! - Compute the delay before the next attempt
//! - Classify upstream outcomes as retryable or final
//!
//! # Design Decisions
//! - Jittered backoff prevents thundering herd
//! - Timeouts, connection errors and 5xx are retryable
//! - 4xx is never retried: authorization codes are single-use

use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Backoff schedule and attempt budget for one upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial_delay_ms, self.max_delay_ms)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow the zero-based `attempt`.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// Determine if an upstream outcome should be retried.
///
/// `status` is `None` when no response was received.
pub fn is_retryable(status: Option<u16>, is_connection_error: bool) -> bool {
    if is_connection_error {
        return true;
    }
    matches!(status, Some(s) if s >= 500)
}
