//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
/// capped at `max`, plus up to 10% jitter.
pub fn calculate_backoff(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let exponential_base = 2u64.saturating_pow(retry - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
