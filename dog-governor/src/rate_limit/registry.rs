use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitSettings;
use crate::types::QueueKey;

use super::SlidingWindowLimiter;

/// Which callers share one rate window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    /// One window per (service, account) - accounts never consume each other's allowance
    PerAccount,

    /// One window per service, shared by every account calling it
    Shared,
}

impl Default for LimiterScope {
    fn default() -> Self {
        Self::PerAccount
    }
}

impl std::str::FromStr for LimiterScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_account" | "per-account" | "account" => Ok(Self::PerAccount),
            "shared" | "service" => Ok(Self::Shared),
            _ => Err(format!("Invalid limiter scope: {}", s)),
        }
    }
}

/// Lazily created rate windows, resolved by queue key according to the scope
#[derive(Debug)]
pub struct LimiterRegistry {
    scope: LimiterScope,
    max_calls: usize,
    window: Duration,
    limiters: DashMap<QueueKey, Arc<SlidingWindowLimiter>>,
}

impl LimiterRegistry {
    pub fn new(scope: LimiterScope, max_calls: usize, window: Duration) -> Self {
        Self {
            scope,
            max_calls,
            window,
            limiters: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(settings.scope, settings.max_calls, settings.window())
    }

    pub fn scope(&self) -> LimiterScope {
        self.scope
    }

    /// Registry key a queue key maps to under the configured scope
    pub fn scope_key(&self, key: &QueueKey) -> QueueKey {
        match self.scope {
            LimiterScope::PerAccount => key.clone(),
            LimiterScope::Shared => key.service_wide(),
        }
    }

    /// Get or create the window governing calls made for `key`
    pub fn limiter_for(&self, key: &QueueKey) -> Arc<SlidingWindowLimiter> {
        self.limiters
            .entry(self.scope_key(key))
            .or_insert_with(|| Arc::new(SlidingWindowLimiter::new(self.max_calls, self.window)))
            .clone()
    }

    /// Drop the window for `key` if nobody holds it and it has aged out.
    /// Returns true when the window was discarded.
    pub fn release(&self, key: &QueueKey) -> bool {
        let scope_key = self.scope_key(key);
        let removed = self
            .limiters
            .remove_if(&scope_key, |_, limiter| Arc::strong_count(limiter) == 1 && limiter.is_idle())
            .is_some();
        if removed {
            debug!(key = %scope_key, "Discarded idle rate window");
        }
        removed
    }

    /// When the window for `key` can next be released, or `None` if there is
    /// no window. A window still held elsewhere reports one window length out.
    pub fn idle_at(&self, key: &QueueKey) -> Option<Instant> {
        let limiter = self.limiters.get(&self.scope_key(key))?;
        Some(
            limiter
                .ages_out_at()
                .unwrap_or_else(|| Instant::now() + self.window),
        )
    }

    /// Discard every idle, unused window. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.limiters.len();
        self.limiters
            .retain(|_, limiter| Arc::strong_count(limiter) > 1 || !limiter.is_idle());
        before.saturating_sub(self.limiters.len())
    }

    /// Number of live windows
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::from_settings(&RateLimitSettings::default())
    }
}
