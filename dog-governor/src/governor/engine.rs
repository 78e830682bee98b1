use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::GovernorConfig;
use crate::error::{GovernorError, GovernorResult};
use crate::observability::tracing::{work_span, worker_span};
use crate::observability::{BoxStream, GovernorMetrics, ObservabilityLayer};
use crate::rate_limit::LimiterRegistry;
use crate::types::{GovernorEvent, Priority, QueueKey, QueueStatus};

use super::item::{Outcome, Pending, Ticket, WorkItem};
use super::pending::KeyQueue;

type SharedQueue = Arc<Mutex<KeyQueue>>;

struct Inner {
    queues: DashMap<QueueKey, SharedQueue>,
    config: GovernorConfig,
    sequence: AtomicU64,
    limiters: Arc<LimiterRegistry>,
    observability: ObservabilityLayer,
}

/// Serializes outbound work per (service, account) key.
///
/// Each key gets its own priority queue and, while it has work, exactly one
/// worker task that runs items one at a time with a pacing pause between
/// them. Keys never block each other. Cloning is cheap and clones share all
/// state.
#[derive(Clone)]
pub struct RequestGovernor {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub(crate) struct WeakGovernor(Weak<Inner>);

impl WeakGovernor {
    pub(crate) fn upgrade(&self) -> Option<RequestGovernor> {
        self.0.upgrade().map(|inner| RequestGovernor { inner })
    }
}

/// Result of a worker trying to go idle
enum Retire {
    Retired,
    Refilled,
    Detached,
}

impl RequestGovernor {
    /// Governor with default settings
    pub fn new() -> Self {
        Self::build(GovernorConfig::default())
    }

    /// Governor with custom settings, rejected if they do not validate
    pub fn with_config(config: GovernorConfig) -> GovernorResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: GovernorConfig) -> Self {
        let limiters = Arc::new(LimiterRegistry::from_settings(&config.rate_limit));
        let observability = ObservabilityLayer::new(config.queue.event_buffer);

        Self {
            inner: Arc::new(Inner {
                queues: DashMap::new(),
                config,
                sequence: AtomicU64::new(0),
                limiters,
                observability,
            }),
        }
    }

    /// Handle that does not keep the governor alive
    pub(crate) fn downgrade(&self) -> WeakGovernor {
        WeakGovernor(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.inner.config
    }

    /// Rate windows shared with clients built from this governor
    pub fn limiters(&self) -> &Arc<LimiterRegistry> {
        &self.inner.limiters
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.inner.observability
    }

    pub fn metrics(&self) -> &Arc<GovernorMetrics> {
        self.inner.observability.metrics()
    }

    /// Lifecycle events emitted after this call
    pub fn events(&self) -> BoxStream<GovernorEvent> {
        self.inner.observability.event_stream()
    }

    /// Run `action` on `key`'s queue and wait for its result.
    ///
    /// Fails immediately with [`GovernorError::QueueFull`] when the key
    /// already holds `max_queue_size` pending items. Otherwise the action's
    /// own result is returned once it has executed.
    pub async fn submit<T, F, Fut>(
        &self,
        key: QueueKey,
        priority: Priority,
        action: F,
    ) -> GovernorResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(key, priority, action)?.await
    }

    /// String form of [`submit`](Self::submit); `priority` must be in `0..=10`.
    pub async fn submit_with<T, F, Fut>(
        &self,
        service: &str,
        account_id: &str,
        priority: i64,
        action: F,
    ) -> GovernorResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let priority = Priority::new(priority)?;
        self.submit(QueueKey::new(service, account_id), priority, action)
            .await
    }

    /// Like [`submit`](Self::submit), but the item fails with
    /// [`GovernorError::Timeout`] if it is still queued after `max_wait`.
    pub async fn submit_with_deadline<T, F, Fut>(
        &self,
        key: QueueKey,
        priority: Priority,
        max_wait: Duration,
        action: F,
    ) -> GovernorResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_with_deadline(key, priority, Some(max_wait), action)?
            .await
    }

    /// Admit `action` without waiting for it. The returned ticket resolves to
    /// the action's result; dropping it does not cancel the work.
    pub fn enqueue<T, F, Fut>(
        &self,
        key: QueueKey,
        priority: Priority,
        action: F,
    ) -> GovernorResult<Ticket<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let max_wait = self.inner.config.queue.max_wait();
        self.enqueue_with_deadline(key, priority, max_wait, action)
    }

    #[instrument(skip_all, fields(key = %key, priority = priority.as_u8()))]
    pub fn enqueue_with_deadline<T, F, Fut>(
        &self,
        key: QueueKey,
        priority: Priority,
        max_wait: Option<Duration>,
        action: F,
    ) -> GovernorResult<Ticket<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| {
            GovernorError::Internal("RequestGovernor requires a Tokio runtime".to_string())
        })?;

        let capacity = self.inner.config.queue.max_queue_size;
        let (tx, rx) = oneshot::channel();

        // The map entry stays locked while the queue is updated so a worker
        // retiring this key cannot slip in between.
        let entry = self
            .inner
            .queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(KeyQueue::new())));
        let queue = Arc::clone(entry.value());

        let (admitted, expired, start_worker) = {
            let mut pending = queue.lock();
            let expired = pending.take_expired(Instant::now());

            if pending.len() >= capacity {
                (None, expired, false)
            } else {
                let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
                let item = WorkItem::new(
                    priority,
                    sequence,
                    max_wait,
                    Box::new(Pending::new(action, tx)),
                );
                let work_id = item.id.clone();
                pending.push(item);

                let start_worker = !pending.processing;
                pending.processing = true;
                (Some((work_id, pending.len())), expired, start_worker)
            }
        };
        drop(entry);

        for item in expired {
            self.expire(&key, item);
        }

        let Some((work_id, queue_depth)) = admitted else {
            self.inner.observability.record_rejected(&key, priority);
            debug!(capacity, "Queue full, rejecting submission");
            return Err(GovernorError::QueueFull { key, capacity });
        };

        self.inner
            .observability
            .record_submitted(&work_id, &key, priority, queue_depth);

        if start_worker {
            debug!("Starting worker");
            let span = worker_span(&key);
            runtime.spawn(self.clone().run_worker(key, queue).instrument(span));
        }

        Ok(Ticket::new(work_id, rx))
    }

    /// Snapshot of one key's queue.
    ///
    /// A caller receives its result before the worker checks for more work,
    /// so on a multi-thread runtime `status` read right after `submit`
    /// returns may briefly show `is_processing` with a `queue_depth` of zero.
    pub fn status(&self, key: &QueueKey) -> QueueStatus {
        let queue = match self.inner.queues.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return QueueStatus::idle(key.clone()),
        };

        let pending = queue.lock();
        QueueStatus {
            key: key.clone(),
            queue_depth: pending.len(),
            is_processing: pending.processing,
            oldest_pending_age_ms: pending
                .oldest_age(Instant::now())
                .map(|age| age.as_millis() as u64),
        }
    }

    pub fn status_of(&self, service: &str, account_id: &str) -> QueueStatus {
        self.status(&QueueKey::new(service, account_id))
    }

    /// Keys that currently have queue state (pending items or a running worker)
    pub fn active_keys(&self) -> Vec<QueueKey> {
        let mut keys: Vec<_> = self
            .inner
            .queues
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Fail every pending item of `key` with [`GovernorError::Cleared`] and
    /// return how many were rejected. An item already executing is unaffected.
    #[instrument(skip_all, fields(key = %key))]
    pub fn clear(&self, key: &QueueKey) -> usize {
        let queue = match self.inner.queues.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return 0,
        };

        let drained = queue.lock().drain_all();

        // With no worker running the state can go now; otherwise the worker
        // discards it when it finds the queue empty.
        self.inner.queues.remove_if(key, |_, current| {
            let current = current.lock();
            current.is_empty() && !current.processing
        });

        let count = drained.len();
        for item in drained {
            self.inner.observability.record_cleared(&item.id, key);
            item.completion
                .reject(GovernorError::Cleared { key: key.clone() });
        }

        if count > 0 {
            info!(count, "Cleared pending work");
        }
        count
    }

    /// [`clear`](Self::clear) every key; returns the total rejected
    pub fn clear_all(&self) -> usize {
        self.active_keys().iter().map(|key| self.clear(key)).sum()
    }

    /// Fail every queued item past its deadline. Returns how many expired.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let queues: Vec<(QueueKey, SharedQueue)> = self
            .inner
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut count = 0;
        for (key, queue) in queues {
            let expired = queue.lock().take_expired(now);
            count += expired.len();
            for item in expired {
                self.expire(&key, item);
            }
        }
        count
    }

    fn expire(&self, key: &QueueKey, item: WorkItem) {
        let waited = item.waited(Instant::now());
        warn!(
            key = %key,
            work_id = %item.id,
            waited_ms = waited.as_millis() as u64,
            "Work item expired in queue"
        );
        self.inner.observability.record_expired(&item.id, key, waited);
        item.completion.reject(GovernorError::Timeout {
            key: key.clone(),
            waited_ms: waited.as_millis() as u64,
        });
    }

    async fn run_worker(self, key: QueueKey, queue: SharedQueue) {
        let pacing = self.inner.config.queue.pacing();

        loop {
            let (next, expired) = {
                let mut pending = queue.lock();
                let expired = pending.take_expired(Instant::now());
                (pending.pop(), expired)
            };

            for item in expired {
                self.expire(&key, item);
            }

            let item = match next {
                Some(item) => item,
                None => match self.try_retire(&key, &queue) {
                    Retire::Refilled => continue,
                    Retire::Retired => break,
                    Retire::Detached => {
                        self.abandon(&key, &queue);
                        break;
                    }
                },
            };

            self.execute(&key, item).await;

            let more_pending = !queue.lock().is_empty();
            if more_pending && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        debug!("Worker idle");
        self.release_window_later(key);
    }

    /// Discard `key`'s rate window once its last call start ages out,
    /// unless a newer worker for the key has taken over by then.
    fn release_window_later(&self, key: QueueKey) {
        let limiters = &self.inner.limiters;
        if limiters.release(&key) {
            return;
        }
        let Some(mut wake_at) = limiters.idle_at(&key) else {
            return;
        };

        let weak = self.downgrade();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(wake_at).await;

                let Some(governor) = weak.upgrade() else {
                    return;
                };
                if governor.inner.queues.contains_key(&key) {
                    // That worker releases the window when it goes idle
                    return;
                }
                let limiters = &governor.inner.limiters;
                if limiters.release(&key) {
                    return;
                }
                match limiters.idle_at(&key) {
                    Some(next) => wake_at = next,
                    None => return,
                }
            }
        });
    }

    async fn execute(&self, key: &QueueKey, item: WorkItem) {
        let WorkItem {
            id,
            priority,
            enqueued_at,
            completion,
            ..
        } = item;

        let started = Instant::now();
        self.inner
            .observability
            .record_started(&id, key, started.saturating_duration_since(enqueued_at));

        let outcome = completion
            .run()
            .instrument(work_span(key, &id, priority))
            .await;
        let duration = started.elapsed();

        match outcome {
            Outcome::Completed => {
                self.inner.observability.record_completed(&id, key, duration);
            }
            Outcome::Failed(error) => {
                debug!(work_id = %id, error = %error, "Work item failed");
                self.inner
                    .observability
                    .record_failed(&id, key, error, duration);
            }
        }
    }

    /// Go idle if nothing is pending. The emptiness check, the flag flip and
    /// the removal happen under the map entry and queue locks together.
    fn try_retire(&self, key: &QueueKey, queue: &SharedQueue) -> Retire {
        let mut state = Retire::Detached;
        self.inner.queues.remove_if(key, |_, current| {
            if !Arc::ptr_eq(current, queue) {
                return false;
            }
            let mut pending = current.lock();
            if pending.is_empty() {
                pending.processing = false;
                state = Retire::Retired;
                true
            } else {
                state = Retire::Refilled;
                false
            }
        });
        state
    }

    /// The worker's queue is no longer registered; fail whatever is left
    fn abandon(&self, key: &QueueKey, queue: &SharedQueue) {
        let orphans = {
            let mut pending = queue.lock();
            pending.processing = false;
            pending.drain_all()
        };
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "Worker detached with pending items");
        }
        for item in orphans {
            self.inner.observability.record_cleared(&item.id, key);
            item.completion
                .reject(GovernorError::Cleared { key: key.clone() });
        }
    }
}

impl Default for RequestGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGovernor")
            .field("active_keys", &self.inner.queues.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn quick_config() -> GovernorConfig {
        let mut config = GovernorConfig::default();
        config.queue.pacing_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_submit_returns_action_result() {
        let governor = RequestGovernor::new();
        let key = QueueKey::new("resource-graph", "acct-1");

        let value = governor
            .submit(key.clone(), Priority::NORMAL, || async { Ok(41 + 1) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(governor.status(&key).is_idle());
        assert!(governor.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_action_error_goes_to_its_caller_only() {
        let governor = RequestGovernor::with_config(quick_config()).unwrap();
        let key = QueueKey::new("cost-query", "acct-1");

        let failing = governor
            .enqueue(key.clone(), Priority::HIGH, || async {
                Err::<(), _>(GovernorError::Internal("boom".into()))
            })
            .unwrap();
        let healthy = governor
            .enqueue(key.clone(), Priority::NORMAL, || async { Ok("fine") })
            .unwrap();

        assert!(failing.await.is_err());
        assert_eq!(healthy.await.unwrap(), "fine");
        assert_eq!(governor.metrics().failed(), 1);
        assert_eq!(governor.metrics().completed(), 1);
    }

    #[tokio::test]
    async fn test_submit_with_validates_priority() {
        let governor = RequestGovernor::new();

        let result = governor
            .submit_with("svc", "acct", 11, || async { Ok(()) })
            .await;

        assert!(matches!(result, Err(GovernorError::InvalidPriority(11))));
        assert!(governor.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_with_config_rejects_invalid_settings() {
        let mut config = GovernorConfig::default();
        config.rate_limit.max_calls = 0;

        assert!(matches!(
            RequestGovernor::with_config(config),
            Err(GovernorError::Config(_))
        ));
    }

    #[test]
    fn test_enqueue_outside_runtime_fails() {
        let governor = RequestGovernor::new();

        let result = governor.enqueue(QueueKey::new("svc", "acct"), Priority::NORMAL, || async {
            Ok(())
        });

        assert!(matches!(result, Err(GovernorError::Internal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_items_not_after_last() {
        let governor = RequestGovernor::new();
        let key = QueueKey::new("svc", "acct");
        let starts = Arc::new(StdMutex::new(Vec::new()));
        let origin = Instant::now();

        let tickets: Vec<_> = (0..3)
            .map(|_| {
                let starts = starts.clone();
                governor
                    .enqueue(key.clone(), Priority::NORMAL, move || async move {
                        starts.lock().unwrap().push(origin.elapsed());
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for ticket in tickets {
            ticket.await.unwrap();
        }
        let finished = origin.elapsed();

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts[0], Duration::ZERO);
        assert_eq!(starts[1], Duration::from_millis(100));
        assert_eq!(starts[2], Duration::from_millis(200));
        assert_eq!(finished, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_dropped_ticket_still_runs() {
        let governor = RequestGovernor::with_config(quick_config()).unwrap();
        let key = QueueKey::new("svc", "acct");
        let (seen_tx, seen_rx) = oneshot::channel();

        let ticket = governor
            .enqueue(key.clone(), Priority::NORMAL, move || async move {
                let _ = seen_tx.send(());
                Ok(())
            })
            .unwrap();
        drop(ticket);

        assert!(seen_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_action_does_not_stop_worker() {
        let governor = RequestGovernor::with_config(quick_config()).unwrap();
        let key = QueueKey::new("svc", "acct");

        let first = governor
            .enqueue(key.clone(), Priority::HIGH, || async {
                if true {
                    panic!("bad action");
                }
                Ok(())
            })
            .unwrap();
        let second = governor
            .enqueue(key.clone(), Priority::NORMAL, || async { Ok(7) })
            .unwrap();

        assert!(matches!(first.await, Err(GovernorError::Internal(_))));
        assert_eq!(second.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_waiting_items() {
        let governor = RequestGovernor::new();
        let key = QueueKey::new("svc", "acct");
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = governor
            .enqueue(key.clone(), Priority::HIGH, move || async move {
                let _ = release_rx.await;
                Ok(())
            })
            .unwrap();
        let waiting = governor
            .enqueue_with_deadline(
                key.clone(),
                Priority::NORMAL,
                Some(Duration::from_secs(5)),
                || async { Ok(()) },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(governor.sweep_expired(), 1);
        assert!(matches!(waiting.await, Err(GovernorError::Timeout { .. })));

        release_tx.send(()).unwrap();
        blocker.await.unwrap();
        assert_eq!(governor.metrics().expired(), 1);
    }
}
