//! Backoff delay computation.

use rand::Rng;
use std::time::Duration;

/// Upper bound (exclusive) of the multiplicative jitter.
pub const MAX_JITTER: f64 = 0.1;

/// Samples a jitter factor uniformly from `[0, MAX_JITTER)`.
#[must_use]
pub fn sample_jitter() -> f64 {
    rand::thread_rng().gen_range(0.0..MAX_JITTER)
}

/// Delay before the attempt following the failed `attempt` (1-based):
/// `min(base * 2^(attempt-1) * (1 + jitter), max)`.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let jitter = jitter.clamp(0.0, MAX_JITTER);
    let secs = base.as_secs_f64() * 2f64.powi(exponent) * (1.0 + jitter);

    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn test_exponential_without_jitter() {
        assert_eq!(backoff_delay(1, BASE, MAX, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, BASE, MAX, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, BASE, MAX, 0.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, BASE, MAX, 0.0), Duration::from_secs(16));
    }

    #[test]
    fn test_capped_at_max() {
        assert_eq!(backoff_delay(6, BASE, MAX, 0.0), MAX);
        assert_eq!(backoff_delay(64, BASE, MAX, 0.05), MAX);
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX, 0.05), MAX);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = backoff_delay(2, BASE, MAX, 0.05);
        assert!(delay >= Duration::from_secs(2));
        assert!(delay < Duration::from_millis(2200));
    }

    #[test]
    fn test_monotonic_and_bounded_with_random_jitter() {
        for _ in 0..200 {
            let mut previous = Duration::ZERO;
            for attempt in 1..=12 {
                let delay = backoff_delay(attempt, BASE, MAX, sample_jitter());
                assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
                assert!(delay <= MAX);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_sample_jitter_range() {
        for _ in 0..1000 {
            let j = sample_jitter();
            assert!((0.0..MAX_JITTER).contains(&j));
        }
    }
}
