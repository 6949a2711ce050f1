//! Pure reconnection backoff policy
//!
//! Delays grow geometrically from a floor to a ceiling:
//! `delay(attempt) = min(max, min * factor^attempt)`. The attempt counter
//! advances on every failed connect and resets after a successful one.

use std::time::Duration;

/// Backoff bounds and growth factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay used for the first retry
    pub min: Duration,
    /// Ceiling no delay ever exceeds
    pub max: Duration,
    /// Growth multiplier applied per attempt
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(300),
            factor: 1.6,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for a given zero-based attempt (pure function)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let min = self.min.as_secs_f64();
        let max = self.max.as_secs_f64();
        if min >= max {
            return self.max;
        }

        let factor = self.factor.max(1.0);
        let delay = min * factor.powf(f64::from(attempt));
        if !delay.is_finite() || delay >= max {
            return self.max;
        }

        Duration::from_secs_f64(delay)
    }
}

/// Backoff state owned by the supervisor
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Return the delay for the current attempt and advance the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget all previous failures
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario_config() -> BackoffConfig {
        BackoffConfig {
            min: Duration::from_secs(1),
            max: Duration::from_secs(10),
            factor: 1.6,
        }
    }

    #[test]
    fn test_backoff_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.min, Duration::from_secs(1));
        assert_eq!(config.max, Duration::from_secs(300));
        assert_eq!(config.factor, 1.6);
    }

    #[test]
    fn test_five_consecutive_failures() {
        let mut backoff = Backoff::new(scenario_config());
        let delays: Vec<f64> = (0..5)
            .map(|_| backoff.next_delay().as_secs_f64())
            .collect();

        let expected = [1.0, 1.6, 2.56, 4.096, 6.5536];
        for (actual, expected) in delays.iter().zip(expected) {
            assert!(
                (actual - expected).abs() < 1e-6,
                "expected {expected}, got {actual}"
            );
        }
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut backoff = Backoff::new(scenario_config());
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut backoff = Backoff::new(scenario_config());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_min_above_max_yields_max() {
        let config = BackoffConfig {
            min: Duration::from_secs(5),
            max: Duration::from_secs(2),
            factor: 2.0,
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(2));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let config = scenario_config();
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(10));
    }

    proptest! {
        #[test]
        fn prop_delay_bounded_and_non_decreasing(
            min_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            factor in 1.0f64..4.0,
            failures in 1usize..64,
        ) {
            let config = BackoffConfig {
                min: Duration::from_millis(min_ms),
                max: Duration::from_millis(min_ms + extra_ms),
                factor,
            };
            let mut backoff = Backoff::new(config);
            let mut previous = Duration::ZERO;
            for _ in 0..failures {
                let delay = backoff.next_delay();
                prop_assert!(delay <= config.max);
                prop_assert!(delay >= previous);
                previous = delay;
            }

            backoff.reset();
            prop_assert_eq!(backoff.next_delay(), config.delay_for(0));
        }
    }
}
