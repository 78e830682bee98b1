use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::GovernorConfig;
use crate::error::GovernorResult;
use crate::governor::RequestGovernor;
use crate::observability::GovernorMetrics;
use crate::pagination::{Page, PageSet, Paginator};
use crate::rate_limit::LimiterRegistry;
use crate::retry::RetryExecutor;
use crate::types::{Priority, QueueKey};

use super::ControlPlaneApi;

/// Rate-limited, retrying, paginating front for one [`ControlPlaneApi`].
///
/// Every attempt, including retries and follow-up pages, takes a slot in the
/// key's rate window first.
pub struct GovernedClient<A> {
    api: Arc<A>,
    limiters: Arc<LimiterRegistry>,
    retry: RetryExecutor,
    paginator: Paginator,
    default_max_records: usize,
}

impl<A: ControlPlaneApi + 'static> GovernedClient<A> {
    /// Client with its own rate windows
    pub fn new(api: A, config: &GovernorConfig) -> Self {
        Self {
            api: Arc::new(api),
            limiters: Arc::new(LimiterRegistry::from_settings(&config.rate_limit)),
            retry: RetryExecutor::from_settings(&config.retry),
            paginator: Paginator::from_settings(&config.pagination),
            default_max_records: config.pagination.default_max_records,
        }
    }

    /// Client sharing the governor's settings, rate windows and metrics
    pub fn for_governor(api: A, governor: &RequestGovernor) -> Self {
        Self::new(api, governor.config())
            .with_limiters(Arc::clone(governor.limiters()))
            .with_metrics(Arc::clone(governor.metrics()))
    }

    pub fn with_limiters(mut self, limiters: Arc<LimiterRegistry>) -> Self {
        self.limiters = limiters;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernorMetrics>) -> Self {
        self.retry = self.retry.with_metrics(metrics);
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn limiters(&self) -> &Arc<LimiterRegistry> {
        &self.limiters
    }

    /// One page, rate limited and retried
    pub async fn call_once(
        &self,
        key: &QueueKey,
        request: &A::Request,
        cursor: Option<&str>,
    ) -> GovernorResult<Page<A::Row>> {
        let limiter = self.limiters.limiter_for(key);
        let limiter = &limiter;
        let api = &self.api;

        self.retry
            .run_provider(move || async move {
                let waited = limiter.acquire().await;
                if !waited.is_zero() {
                    debug!(key = %key, waited_ms = waited.as_millis() as u64, "Rate limited call");
                }
                api.call(request, cursor).await
            })
            .await
    }

    /// Every page up to `max_records` rows (the configured default when `None`)
    #[instrument(skip_all, fields(key = %key))]
    pub async fn fetch_all(
        &self,
        key: &QueueKey,
        request: &A::Request,
        max_records: Option<usize>,
    ) -> GovernorResult<PageSet<A::Row>> {
        let max_records = max_records.unwrap_or(self.default_max_records);

        let result = self
            .paginator
            .fetch_all(
                move |cursor: Option<String>| async move {
                    self.call_once(key, request, cursor.as_deref()).await
                },
                max_records,
            )
            .await?;

        debug!(
            rows = result.len(),
            pages = result.pages_fetched,
            capped = result.capped,
            "Query complete"
        );
        Ok(result)
    }

    /// Queue a [`fetch_all`](Self::fetch_all) behind `governor` on `key`
    pub async fn submit_query(
        &self,
        governor: &RequestGovernor,
        key: QueueKey,
        priority: Priority,
        request: A::Request,
        max_records: Option<usize>,
    ) -> GovernorResult<PageSet<A::Row>>
    where
        A::Request: 'static,
        A::Row: 'static,
    {
        let client = self.clone();
        let query_key = key.clone();

        governor
            .submit(key, priority, move || async move {
                client.fetch_all(&query_key, &request, max_records).await
            })
            .await
    }
}

impl<A> Clone for GovernedClient<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            limiters: Arc::clone(&self.limiters),
            retry: self.retry.clone(),
            paginator: self.paginator.clone(),
            default_max_records: self.default_max_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GovernorError, ProviderError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted responses, then serves an empty final page
    struct ScriptedApi {
        responses: parking_lot::Mutex<VecDeque<Result<Page<u32>, ProviderError>>>,
        calls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<Page<u32>, ProviderError>>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ControlPlaneApi for ScriptedApi {
        type Request = String;
        type Row = u32;

        async fn call(
            &self,
            _request: &String,
            _cursor: Option<&str>,
        ) -> Result<Page<u32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::last(Vec::new())))
        }
    }

    fn key() -> QueueKey {
        QueueKey::new("resource-graph", "acct-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_once_retries_transient_errors() {
        let client = GovernedClient::new(
            ScriptedApi::new(vec![
                Err(ProviderError::rate_limited(None)),
                Err(ProviderError::unavailable("maintenance")),
                Ok(Page::last(vec![1, 2, 3])),
            ]),
            &GovernorConfig::default(),
        );

        let page = client.call_once(&key(), &"q".to_string(), None).await.unwrap();

        assert_eq!(page.rows, vec![1, 2, 3]);
        assert_eq!(client.api().calls(), 3);
        // Every attempt took a slot in the window
        assert_eq!(client.limiters().limiter_for(&key()).in_window(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let client = GovernedClient::new(
            ScriptedApi::new(vec![Err(ProviderError::unauthorized("expired token"))]),
            &GovernorConfig::default(),
        );

        let result = client.call_once(&key(), &"q".to_string(), None).await;

        assert!(matches!(result, Err(GovernorError::Provider(_))));
        assert_eq!(client.api().calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_honours_default_cap() {
        let mut config = GovernorConfig::default();
        config.pagination.default_max_records = 4;
        let client = GovernedClient::new(
            ScriptedApi::new(vec![
                Ok(Page::more(vec![1, 2, 3], "c1")),
                Ok(Page::more(vec![4, 5, 6], "c2")),
                Ok(Page::last(vec![7])),
            ]),
            &config,
        );

        let result = client.fetch_all(&key(), &"q".to_string(), None).await.unwrap();

        assert_eq!(result.rows, vec![1, 2, 3, 4, 5, 6]);
        assert!(result.capped);
        assert_eq!(client.api().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_query_runs_behind_governor() {
        let governor = RequestGovernor::new();
        let client = GovernedClient::for_governor(
            ScriptedApi::new(vec![
                Err(ProviderError::network("connection reset")),
                Ok(Page::last(vec![9])),
            ]),
            &governor,
        );

        let result = client
            .submit_query(&governor, key(), Priority::HIGH, "q".to_string(), None)
            .await
            .unwrap();

        assert_eq!(result.rows, vec![9]);
        assert_eq!(governor.metrics().retries(), 1);
        assert_eq!(governor.metrics().completed(), 1);
        assert!(Arc::ptr_eq(client.limiters(), governor.limiters()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_paces_pages() {
        let mut config = GovernorConfig::default();
        config.rate_limit.max_calls = 2;
        config.rate_limit.window_ms = 1_000;
        let client = GovernedClient::new(
            ScriptedApi::new(vec![
                Ok(Page::more(vec![1], "c1")),
                Ok(Page::more(vec![2], "c2")),
                Ok(Page::last(vec![3])),
            ]),
            &config,
        );

        let started = tokio::time::Instant::now();
        let result = client.fetch_all(&key(), &"q".to_string(), None).await.unwrap();

        assert_eq!(result.rows, vec![1, 2, 3]);
        assert_eq!(started.elapsed(), Duration::from_millis(1_000));
    }
}
