//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Fraction of the capped delay used as the jitter range, in tenths.
const JITTER_TENTHS: u64 = 3;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is zero-based: the delay after the first failed attempt is
/// `base_ms`. The exponential value is capped at `max_ms` and then jittered
/// upward by `[0, 30%)` of the capped value.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay.saturating_mul(JITTER_TENTHS) / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
