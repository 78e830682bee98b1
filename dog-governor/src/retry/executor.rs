use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{ErrorClass, GovernorError, GovernorResult, ProviderError};
use crate::observability::GovernorMetrics;

use super::BackoffPolicy;

/// Bookkeeping for one logical call across its attempts
#[derive(Debug, Clone, Default)]
pub struct RetryAttemptState {
    /// Attempts started so far (1-based once running)
    pub attempt: u32,
    pub last_error: Option<ProviderError>,
    pub next_delay: Option<Duration>,
}

impl RetryAttemptState {
    fn record_failure(&mut self, error: ProviderError, delay: Duration) {
        self.last_error = Some(error);
        self.next_delay = Some(delay);
    }
}

/// Runs a provider call with error classification and a bounded retry budget
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    backoff: BackoffPolicy,
    metrics: Option<Arc<GovernorMetrics>>,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            metrics: None,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, BackoffPolicy::from_settings(settings))
    }

    /// Count retries into the given metrics
    pub fn with_metrics(mut self, metrics: Arc<GovernorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Invoke `action` until it succeeds, fails fatally, or the attempt
    /// budget is spent.
    ///
    /// - `Fatal` errors surface as [`GovernorError::Provider`] on first occurrence
    /// - `Retryable` errors are retried after the backoff delay
    /// - exhausting the budget yields [`GovernorError::ExhaustedRetries`]
    pub async fn run<T, F, Fut, C>(&self, mut action: F, classify: C) -> GovernorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        C: Fn(&ProviderError) -> ErrorClass,
    {
        let mut state = RetryAttemptState::default();

        loop {
            state.attempt += 1;

            let error = match action().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        debug!(attempt = state.attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if classify(&error) == ErrorClass::Fatal {
                debug!(attempt = state.attempt, error = %error, "Fatal provider error, not retrying");
                return Err(GovernorError::Provider(error));
            }

            if state.attempt >= self.max_attempts {
                warn!(
                    attempts = state.attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(GovernorError::ExhaustedRetries {
                    attempts: state.attempt,
                    source: error,
                });
            }

            let delay = self.backoff.delay_with_hint(state.attempt, error.retry_after());
            warn!(
                attempt = state.attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable provider error, backing off"
            );
            state.record_failure(error, delay);

            if let Some(metrics) = &self.metrics {
                metrics.increment_retries();
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// [`run`](Self::run) with the default [`ProviderError::class`] classifier
    pub async fn run_provider<T, F, Fut>(&self, action: F) -> GovernorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.run(action, ProviderError::class).await
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}
