use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_core::Stream;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{GovernorEvent, Priority, QueueKey, WorkId};

use super::GovernorMetrics;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Fans lifecycle events out to subscribers and keeps the live counters
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<GovernorEvent>,
    metrics: Arc<GovernorMetrics>,
}

impl ObservabilityLayer {
    /// Create a layer whose event channel holds `capacity` unread events per
    /// subscriber; slow subscribers skip the overflow.
    pub fn new(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity.max(1));

        Self {
            event_broadcaster,
            metrics: Arc::new(GovernorMetrics::new()),
        }
    }

    pub fn record_submitted(
        &self,
        work_id: &WorkId,
        key: &QueueKey,
        priority: Priority,
        queue_depth: usize,
    ) {
        self.metrics.increment_submitted(&key.service);
        self.emit(GovernorEvent::Submitted {
            work_id: work_id.clone(),
            key: key.clone(),
            priority,
            queue_depth,
            at: Utc::now(),
        });
        debug!(%work_id, %key, %priority, queue_depth, "Work submitted");
    }

    pub fn record_rejected(&self, key: &QueueKey, priority: Priority) {
        self.metrics.increment_rejected(&key.service);
        self.emit(GovernorEvent::Rejected {
            key: key.clone(),
            priority,
            at: Utc::now(),
        });
    }

    pub fn record_started(&self, work_id: &WorkId, key: &QueueKey, waited: Duration) {
        self.emit(GovernorEvent::Started {
            work_id: work_id.clone(),
            key: key.clone(),
            waited_ms: waited.as_millis() as u64,
            at: Utc::now(),
        });
    }

    pub fn record_completed(&self, work_id: &WorkId, key: &QueueKey, duration: Duration) {
        self.metrics.increment_completed(&key.service);
        self.metrics.record_execution_time(&key.service, duration);
        self.emit(GovernorEvent::Completed {
            work_id: work_id.clone(),
            key: key.clone(),
            duration_ms: duration.as_millis() as u64,
            at: Utc::now(),
        });
    }

    pub fn record_failed(
        &self,
        work_id: &WorkId,
        key: &QueueKey,
        error: String,
        duration: Duration,
    ) {
        self.metrics.increment_failed(&key.service);
        self.metrics.record_execution_time(&key.service, duration);
        self.emit(GovernorEvent::Failed {
            work_id: work_id.clone(),
            key: key.clone(),
            error,
            at: Utc::now(),
        });
    }

    pub fn record_cleared(&self, work_id: &WorkId, key: &QueueKey) {
        self.metrics.increment_cleared(&key.service, 1);
        self.emit(GovernorEvent::Cleared {
            work_id: work_id.clone(),
            key: key.clone(),
            at: Utc::now(),
        });
    }

    pub fn record_expired(&self, work_id: &WorkId, key: &QueueKey, waited: Duration) {
        self.metrics.increment_expired(&key.service);
        self.emit(GovernorEvent::Expired {
            work_id: work_id.clone(),
            key: key.clone(),
            waited_ms: waited.as_millis() as u64,
            at: Utc::now(),
        });
    }

    fn emit(&self, event: GovernorEvent) {
        // No subscribers is not an error
        let _ = self.event_broadcaster.send(event);
    }

    /// Raw receiver for callers that want to handle lag themselves
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Stream of events emitted after this call; lagged events are skipped
    pub fn event_stream(&self) -> BoxStream<GovernorEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    pub fn metrics(&self) -> &Arc<GovernorMetrics> {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for ObservabilityLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityLayer")
            .field("subscribers", &self.event_broadcaster.receiver_count())
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_events_reach_stream_in_order() {
        let layer = ObservabilityLayer::default();
        let mut events = layer.event_stream();

        let key = QueueKey::new("resource-graph", "acct-1");
        let id = WorkId::new();
        layer.record_submitted(&id, &key, Priority::HIGH, 1);
        layer.record_started(&id, &key, Duration::from_millis(3));
        layer.record_completed(&id, &key, Duration::from_millis(40));

        for expected in ["submitted", "started", "completed"] {
            let event = events.next().await.unwrap();
            assert_eq!(event.event_name(), expected);
            assert_eq!(event.work_id(), Some(&id));
            assert_eq!(event.key(), &key);
        }
    }

    #[tokio::test]
    async fn test_recording_without_subscribers_updates_metrics() {
        let layer = ObservabilityLayer::new(4);
        let key = QueueKey::new("cost-query", "acct-2");

        layer.record_rejected(&key, Priority::NORMAL);
        layer.record_cleared(&WorkId::new(), &key);
        layer.record_expired(&WorkId::new(), &key, Duration::from_secs(30));

        let metrics = layer.metrics();
        assert_eq!(metrics.rejected(), 1);
        assert_eq!(metrics.cleared(), 1);
        assert_eq!(metrics.expired(), 1);
        assert_eq!(metrics.service_metrics("cost-query").unwrap().rejected, 1);
    }
}
