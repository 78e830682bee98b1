use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

use super::item::WorkItem;

/// Pending items of one key plus its worker flag.
///
/// Always accessed under the key's mutex; `processing` is only flipped
/// together with the emptiness check that justifies it.
#[derive(Debug, Default)]
pub(crate) struct KeyQueue {
    heap: BinaryHeap<WorkItem>,
    pub processing: bool,
}

impl KeyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, item: WorkItem) {
        self.heap.push(item);
    }

    /// Highest priority, oldest first
    pub fn pop(&mut self) -> Option<WorkItem> {
        self.heap.pop()
    }

    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.heap
            .iter()
            .map(|item| item.enqueued_at)
            .min()
            .map(|oldest| now.saturating_duration_since(oldest))
    }

    /// Remove every pending item, in execution order
    pub fn drain_all(&mut self) -> Vec<WorkItem> {
        let mut items = std::mem::take(&mut self.heap).into_sorted_vec();
        items.reverse();
        items
    }

    /// Remove items whose deadline has passed
    pub fn take_expired(&mut self, now: Instant) -> Vec<WorkItem> {
        if !self.heap.iter().any(|item| item.is_expired(now)) {
            return Vec::new();
        }

        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_iter()
            .partition(|item| item.is_expired(now));
        self.heap = live.into();
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GovernorError, GovernorResult};
    use crate::governor::item::Pending;
    use crate::types::Priority;
    use tokio::sync::oneshot;

    fn item(priority: Priority, sequence: u64, max_wait: Option<Duration>) -> WorkItem {
        let (tx, _rx) = oneshot::channel::<GovernorResult<()>>();
        let pending = Pending::new(|| async { Ok::<(), GovernorError>(()) }, tx);
        WorkItem::new(priority, sequence, max_wait, Box::new(pending))
    }

    #[tokio::test]
    async fn test_drain_returns_execution_order() {
        let mut queue = KeyQueue::new();
        queue.push(item(Priority::LOW, 0, None));
        queue.push(item(Priority::CRITICAL, 1, None));
        queue.push(item(Priority::NORMAL, 2, None));
        queue.push(item(Priority::CRITICAL, 3, None));

        let order: Vec<u64> = queue.drain_all().iter().map(|i| i.sequence).collect();

        assert_eq!(order, vec![1, 3, 2, 0]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_expired_keeps_live_items() {
        let mut queue = KeyQueue::new();
        queue.push(item(Priority::NORMAL, 0, Some(Duration::from_secs(1))));
        queue.push(item(Priority::NORMAL, 1, None));
        queue.push(item(Priority::HIGH, 2, Some(Duration::from_secs(60))));

        assert!(queue.take_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        let expired = queue.take_expired(Instant::now());

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].sequence, 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|i| i.sequence), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_age() {
        let mut queue = KeyQueue::new();
        assert_eq!(queue.oldest_age(Instant::now()), None);

        queue.push(item(Priority::LOW, 0, None));
        tokio::time::advance(Duration::from_millis(250)).await;
        queue.push(item(Priority::HIGH, 1, None));

        assert_eq!(
            queue.oldest_age(Instant::now()),
            Some(Duration::from_millis(250))
        );
    }
}
