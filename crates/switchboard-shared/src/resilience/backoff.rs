//! Exponential backoff for retryable step failures (C10, spec §7).

use crate::config::RetrySettings;
use std::time::Duration;

/// Delay before retry attempt `attempt` (0-indexed: the delay before the
/// *first* retry, i.e. after the initial attempt failed, is `attempt = 0`).
/// `base_delay_ms * factor^attempt`, capped at `max_delay_seconds`.
pub fn backoff_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let base = settings.base_delay_ms as f64;
    let scaled = base * settings.factor.powi(attempt as i32);
    let cap_ms = (settings.max_delay_seconds as f64) * 1_000.0;
    Duration::from_millis(scaled.min(cap_ms).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_seconds: 30,
        }
    }

    #[test]
    fn first_delay_equals_base() {
        assert_eq!(backoff_delay(&settings(), 0), Duration::from_millis(1_000));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        assert_eq!(backoff_delay(&settings(), 1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(&settings(), 2), Duration::from_millis(4_000));
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(backoff_delay(&settings(), 10), Duration::from_secs(30));
    }
}
