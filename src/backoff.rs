use std::time::Duration;

use rand::Rng;

/// Upper bound for any computed delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Exponential backoff delay for the given 1-based attempt.
///
/// `base * 2^(attempt - 1)`, capped at [`MAX_BACKOFF`], plus up to 10%
/// random jitter so retries from several callers do not line up.
pub fn delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF);

    let jitter_ms = (raw.as_millis() / 10) as u64;
    if jitter_ms == 0 {
        return raw;
    }
    raw + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}
