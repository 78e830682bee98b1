//! Bounded, non-decreasing backoff schedules with optional jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RetrySettings;

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,

    /// `base * attempt`
    Linear,

    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Linear
    }
}

impl std::str::FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "constant" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            _ => Err(format!("Invalid backoff strategy: {}", s)),
        }
    }
}

/// Delay schedule capped at `max`
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(strategy: BackoffStrategy, base: Duration, max: Duration) -> Self {
        Self {
            strategy,
            base,
            max: max.max(base),
            jitter: false,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffStrategy::Fixed, delay, delay)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.strategy,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
        .with_jitter(settings.jitter)
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// Without jitter the schedule never decreases and never exceeds `max`;
    /// jitter adds at most 10% on top.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                base_ms.saturating_mul(2u64.saturating_pow(attempt - 1))
            }
        };
        let capped = delay_ms.min(max_ms);

        let jitter_range = capped / 10;
        let jitter = if self.jitter && jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }

    /// Like [`delay`](Self::delay), but never shorter than a provider's
    /// Retry-After hint (the hint itself is still capped).
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay(attempt);
        match retry_after {
            Some(hint) => computed.max(hint.min(self.max)),
            None => computed,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let policy = BackoffPolicy::new(
            BackoffStrategy::Linear,
            Duration::from_millis(1_000),
            Duration::from_millis(2_500),
        );
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay(3), Duration::from_millis(2_500));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = BackoffPolicy::new(
            BackoffStrategy::Exponential,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        );
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(1_000)).with_jitter(true);
        for attempt in 1..20 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay < Duration::from_millis(1_100));
        }
    }

    #[test]
    fn test_retry_after_hint_raises_delay_up_to_cap() {
        let policy = BackoffPolicy::new(
            BackoffStrategy::Linear,
            Duration::from_millis(500),
            Duration::from_millis(3_000),
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(60))),
            Duration::from_secs(3)
        );
        assert_eq!(policy.delay_with_hint(2, None), Duration::from_millis(1_000));
    }

    proptest::proptest! {
        #[test]
        fn prop_schedule_is_monotonic_and_bounded(
            base in 1u64..5_000,
            extra in 0u64..60_000,
            attempt in 1u32..40,
        ) {
            for strategy in [BackoffStrategy::Fixed, BackoffStrategy::Linear, BackoffStrategy::Exponential] {
                let policy = BackoffPolicy::new(
                    strategy,
                    Duration::from_millis(base),
                    Duration::from_millis(base + extra),
                );
                proptest::prop_assert!(policy.delay(attempt) <= policy.delay(attempt + 1));
                proptest::prop_assert!(policy.delay(attempt + 1) <= policy.max);
            }
        }
    }
}
