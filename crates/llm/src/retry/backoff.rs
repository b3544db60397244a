//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Applies uniform jitter of ±30% to `base`, clamped at zero.
pub fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(-0.3..=0.3);
    let millis = (base.as_millis() as f64 * (1.0 + factor)).max(0.0);
    Duration::from_millis(millis as u64)
}

/// Doubles `current`, capped at `max`.
pub fn double(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_stays_within_thirty_percent_of_base() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = jittered(base);
            assert!(jittered.as_millis() >= 700 && jittered.as_millis() <= 1300);
        }
    }

    #[test]
    fn double_is_capped_at_max_delay() {
        assert_eq!(double(Duration::from_secs(20), Duration::from_secs(30)), Duration::from_secs(30));
        assert_eq!(double(Duration::from_secs(5), Duration::from_secs(30)), Duration::from_secs(10));
    }
}
