//! # Governor configuration
//!
//! All settings have defaults matching the behaviour expected by the
//! control-plane API (15 calls per 5s, 3 attempts, 100 queued items per key).
//! Durations are stored as milliseconds so that configs round-trip cleanly
//! through JSON and environment variables.
//!
//! ## Environment overrides
//! Following the DogRS double-underscore convention:
//!
//! ```bash
//! export DOG_GOVERNOR__QUEUE__MAX_QUEUE_SIZE=50
//! export DOG_GOVERNOR__RATE_LIMIT__SCOPE=shared
//! export DOG_GOVERNOR__RETRY__STRATEGY=exponential
//! ```
//!
//! ```rust
//! use dog_governor::GovernorConfig;
//! let config = GovernorConfig::from_env("DOG_GOVERNOR__").unwrap();
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GovernorError, GovernorResult};
use crate::rate_limit::LimiterScope;
use crate::retry::BackoffStrategy;

/// Top-level governor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub queue: QueueSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub pagination: PaginationSettings,
}

/// Per-key queue behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum pending items per key before submissions are rejected
    pub max_queue_size: usize,
    /// Delay between consecutive items of one key
    pub pacing_ms: u64,
    /// Default deadline for queued items; `None` waits forever
    pub max_wait_ms: Option<u64>,
    /// Sweep interval of the background deadline reaper
    pub reaper_interval_ms: u64,
    /// Capacity of the lifecycle event channel
    pub event_buffer: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            pacing_ms: 100,
            max_wait_ms: None,
            reaper_interval_ms: 1_000,
            event_buffer: 1_000,
        }
    }
}

impl QueueSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

/// Sliding-window rate limit applied to provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Call starts allowed in any trailing window
    pub max_calls: usize,
    pub window_ms: u64,
    /// Whether accounts of one service share the allowance
    pub scope: LimiterScope,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_calls: 15,
            window_ms: 5_000,
            scope: LimiterScope::PerAccount,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Retry budget and backoff schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Add up to 10% random jitter on top of the computed delay
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Linear,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: false,
        }
    }
}

/// Multi-page result walking limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    /// Row cap used when the caller does not pass one
    pub default_max_records: usize,
    /// Hard stop on the number of pages fetched for one call
    pub max_pages: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_max_records: 5_000,
            max_pages: 1_000,
        }
    }
}

impl GovernorConfig {
    /// Defaults overlaid with environment variables starting with `prefix`.
    pub fn from_env(prefix: &str) -> GovernorResult<Self> {
        let mut config = Self::default();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(&normalized, &value)?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults.
    #[cfg(feature = "json")]
    pub fn from_json_str(json: &str) -> GovernorResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set one dotted key (e.g. `queue.max_queue_size`) from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> GovernorResult<()> {
        match key {
            "queue.max_queue_size" => self.queue.max_queue_size = parse(key, value)?,
            "queue.pacing_ms" => self.queue.pacing_ms = parse(key, value)?,
            "queue.max_wait_ms" => {
                self.queue.max_wait_ms = match value {
                    "" | "none" => None,
                    v => Some(parse(key, v)?),
                }
            }
            "queue.reaper_interval_ms" => self.queue.reaper_interval_ms = parse(key, value)?,
            "queue.event_buffer" => self.queue.event_buffer = parse(key, value)?,
            "rate_limit.max_calls" => self.rate_limit.max_calls = parse(key, value)?,
            "rate_limit.window_ms" => self.rate_limit.window_ms = parse(key, value)?,
            "rate_limit.scope" => self.rate_limit.scope = parse(key, value)?,
            "retry.max_attempts" => self.retry.max_attempts = parse(key, value)?,
            "retry.strategy" => self.retry.strategy = parse(key, value)?,
            "retry.base_delay_ms" => self.retry.base_delay_ms = parse(key, value)?,
            "retry.max_delay_ms" => self.retry.max_delay_ms = parse(key, value)?,
            "retry.jitter" => self.retry.jitter = parse(key, value)?,
            "pagination.default_max_records" => {
                self.pagination.default_max_records = parse(key, value)?
            }
            "pagination.max_pages" => self.pagination.max_pages = parse(key, value)?,
            other => {
                return Err(GovernorError::Config(format!("Unknown setting: {}", other)));
            }
        }
        Ok(())
    }

    /// Semantic checks serde cannot express. Returns the first violation.
    pub fn validate(&self) -> GovernorResult<()> {
        let checks = [
            (self.queue.max_queue_size == 0, "queue.max_queue_size must be > 0"),
            (self.queue.event_buffer == 0, "queue.event_buffer must be > 0"),
            (self.queue.reaper_interval_ms == 0, "queue.reaper_interval_ms must be > 0"),
            (self.rate_limit.max_calls == 0, "rate_limit.max_calls must be > 0"),
            (self.rate_limit.window_ms == 0, "rate_limit.window_ms must be > 0"),
            (self.retry.max_attempts == 0, "retry.max_attempts must be > 0"),
            (
                self.retry.max_delay_ms < self.retry.base_delay_ms,
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ),
            (self.pagination.max_pages == 0, "pagination.max_pages must be > 0"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(GovernorError::Config(message.to_string())),
            None => Ok(()),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> GovernorResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| GovernorError::Config(format!("{}={}: {}", key, value, e)))
}
