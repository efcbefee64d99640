//! Exponential backoff for transient source read failures.

use std::time::Duration;

use rand::Rng;

/// Upper bound on a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Computes the delay before the given retry attempt (1-based).
///
/// Exponential growth from the base delay, capped at [`MAX_DELAY`], with
/// half-range jitter so concurrent retries against the same warehouse do not
/// stampede.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(2u32.saturating_pow(exponent));
    let capped = raw.min(MAX_DELAY);

    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_stays_capped() {
        let base = Duration::from_millis(500);

        let first = backoff_delay(1, base);
        assert!(first <= base);

        let tenth = backoff_delay(10, base);
        assert!(tenth <= MAX_DELAY);

        // Attempt numbers far past the cap must not overflow.
        let huge = backoff_delay(u32::MAX, base);
        assert!(huge <= MAX_DELAY);
    }
}
