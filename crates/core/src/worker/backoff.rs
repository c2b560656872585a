//! Exponential backoff with jitter.

use std::time::Duration;

/// Delay before retrying a failed attempt.
///
/// Curve: `base * 2^(attempt-1)` plus uniform jitter in `[0, base)`, with
/// the total capped at `max`. The jitter spreads retries from jobs that
/// failed together (e.g. a converter restart) so they do not stampede back
/// in lockstep.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    // Past 2^16 the cap has long since taken over.
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32 << exponent);

    let jitter = base.mul_f64(rand::random::<f64>());

    scaled.saturating_add(jitter).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_within_base_band() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(60);

        for _ in 0..100 {
            let delay = backoff_delay(1, base, max);
            assert!(delay >= base);
            assert!(delay < base * 2);
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(3600);

        for attempt in 1..=5u32 {
            let floor = base * (1 << (attempt - 1));
            let delay = backoff_delay(attempt, base, max);
            assert!(delay >= floor, "attempt {}: {:?} < {:?}", attempt, delay, floor);
            assert!(delay < floor + base);
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(10);

        for _ in 0..100 {
            let delay = backoff_delay(30, base, max);
            assert_eq!(delay, max);
        }
    }

    #[test]
    fn test_zero_base_is_immediate() {
        let delay = backoff_delay(3, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let delay = backoff_delay(u32::MAX, Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(delay, Duration::from_secs(60));
    }
}
