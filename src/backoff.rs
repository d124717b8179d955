//! Startup and per-attempt exponential backoff schedules.

use std::time::Duration;

use rand::Rng;

const STARTUP_THRESHOLD_1: Duration = Duration::from_secs(100);
const STARTUP_THRESHOLD_2: Duration = Duration::from_secs(200);
const STARTUP_THRESHOLD_3: Duration = Duration::from_secs(10 * 60);

const EXP_MIN: Duration = Duration::from_secs(30);
const EXP_MAX: Duration = Duration::from_secs(10 * 60);

/// The jitter applied to the exponential schedule: a uniform multiplier in
/// `[1 - JITTER_FRACTION, 1 + JITTER_FRACTION)`.
const JITTER_FRACTION: f64 = 0.25;

/// The maximum shift exponent used in `2^(attempts-1)` before the value is
/// clamped anyway; this avoids a pathologically large shift amount in the
/// presence of a very large `attempts` counter.
const MAX_SHIFT: u32 = 32;

/// Compute the startup retry delay given elapsed time since the first
/// attempt, and the number of attempts made so far (used once elapsed time
/// crosses into the exponential regime).
pub fn startup_backoff(elapsed: Duration, attempts: u32) -> Duration {
    if elapsed < STARTUP_THRESHOLD_1 {
        Duration::from_secs(5)
    } else if elapsed < STARTUP_THRESHOLD_2 {
        Duration::from_secs(10)
    } else if elapsed < STARTUP_THRESHOLD_3 {
        Duration::from_secs(30)
    } else {
        exponential_backoff(attempts)
    }
}

/// Compute the exponential per-attempt backoff: `clamp(30s * 2^(attempts -
/// 1), 30s, 10min)`, jittered by `x * (1 + u)` for `u` uniform in
/// `[-0.25, 0.25)`. `attempts <= 1` returns exactly the 30s minimum, with no
/// jitter.
pub fn exponential_backoff(attempts: u32) -> Duration {
    if attempts <= 1 {
        return EXP_MIN;
    }

    let shift = (attempts - 1).min(MAX_SHIFT);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let unclamped = EXP_MIN
        .as_secs()
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .unwrap_or(EXP_MAX);

    let base = unclamped.clamp(EXP_MIN, EXP_MAX);
    jitter(base).clamp(EXP_MIN, EXP_MAX)
}

fn jitter(base: Duration) -> Duration {
    let u = rand::thread_rng().gen_range(-JITTER_FRACTION..JITTER_FRACTION);
    let factor = 1.0 + u;
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}
