//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the nominal delay applied as uniform jitter in either direction.
pub const JITTER_FRACTION: f64 = 0.25;

/// Nominal delay before retry number `attempt` (1-based), without jitter.
///
/// `min(base * 2^(attempt - 1), max)`.
pub fn nominal_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Jittered delay before retry number `attempt`.
///
/// The nominal delay is scaled by a factor drawn uniformly from
/// `[0.75, 1.25]`; the result is never negative.
pub fn delay_for(attempt: u32, base: Duration, max: Duration) -> Duration {
    let nominal = nominal_delay(attempt, base, max);
    if nominal.is_zero() {
        return nominal;
    }

    let factor: f64 =
        rand::thread_rng().gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    let jittered_ms = (nominal.as_millis() as f64 * factor).round().max(0.0);
    Duration::from_millis(jittered_ms as u64)
}
