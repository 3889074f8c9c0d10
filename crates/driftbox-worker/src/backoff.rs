use std::time::Duration;

/// Delay before the retry that follows failed attempt number `attempt` (1-based):
/// `min(base * 2^(attempt - 1), max)`.
#[inline]
pub fn compute_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}
