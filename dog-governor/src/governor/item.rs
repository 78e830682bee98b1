use std::cmp::{Ordering, Reverse};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{GovernorError, GovernorResult};
use crate::types::{Priority, WorkId};

/// How an executed action ended, as seen by the worker loop
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Completed,
    Failed(String),
}

/// Type-erased action plus the sender of its caller's result.
///
/// Exactly one of `run` or `reject` is called, each consuming the box, so the
/// caller hears back at most once.
pub(crate) trait Completion: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, Outcome>;

    fn reject(self: Box<Self>, error: GovernorError);
}

pub(crate) struct Pending<T, F> {
    action: F,
    tx: oneshot::Sender<GovernorResult<T>>,
}

impl<T, F> Pending<T, F> {
    pub(crate) fn new(action: F, tx: oneshot::Sender<GovernorResult<T>>) -> Self {
        Self { action, tx }
    }
}

impl<T, F, Fut> Completion for Pending<T, F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = GovernorResult<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, Outcome> {
        let Pending { action, tx } = *self;

        Box::pin(async move {
            let result = match AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(GovernorError::Internal(format!(
                    "Action panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            let outcome = match &result {
                Ok(_) => Outcome::Completed,
                Err(e) => Outcome::Failed(e.to_string()),
            };

            // The caller may have stopped waiting; the result is then dropped
            let _ = tx.send(result);
            outcome
        })
    }

    fn reject(self: Box<Self>, error: GovernorError) {
        let _ = self.tx.send(Err(error));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// One queued unit of work
pub(crate) struct WorkItem {
    pub id: WorkId,
    pub priority: Priority,
    /// Admission order; breaks priority ties so equal priorities stay FIFO
    pub sequence: u64,
    pub enqueued_at: Instant,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Option<Instant>,
    pub completion: Box<dyn Completion>,
}

impl WorkItem {
    pub fn new(
        priority: Priority,
        sequence: u64,
        max_wait: Option<Duration>,
        completion: Box<dyn Completion>,
    ) -> Self {
        let enqueued_at = Instant::now();
        Self {
            id: WorkId::new(),
            priority,
            sequence,
            enqueued_at,
            submitted_at: Utc::now(),
            deadline: max_wait.map(|wait| enqueued_at + wait),
            completion,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    fn order_key(&self) -> (Priority, Reverse<u64>) {
        (self.priority, Reverse(self.sequence))
    }
}

// Max-heap order: higher priority first, then lower sequence first
impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for WorkItem {}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("submitted_at", &self.submitted_at)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Handle to the eventual result of a submitted action.
///
/// Dropping the ticket does not cancel the work; the action still runs when
/// its turn comes and the result is discarded.
#[derive(Debug)]
pub struct Ticket<T> {
    work_id: WorkId,
    rx: oneshot::Receiver<GovernorResult<T>>,
}

impl<T> Ticket<T> {
    pub(crate) fn new(work_id: WorkId, rx: oneshot::Receiver<GovernorResult<T>>) -> Self {
        Self { work_id, rx }
    }

    pub fn work_id(&self) -> &WorkId {
        &self.work_id
    }
}

impl<T> Future for Ticket<T> {
    type Output = GovernorResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(GovernorError::Internal(
                    "Work item dropped before completion".to_string(),
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn item(priority: u8, sequence: u64) -> (WorkItem, oneshot::Receiver<GovernorResult<u64>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Pending::new(move || async move { Ok::<_, GovernorError>(sequence) }, tx);
        let item = WorkItem::new(
            Priority::try_from(priority).unwrap(),
            sequence,
            None,
            Box::new(pending),
        );
        (item, rx)
    }

    #[tokio::test]
    async fn test_heap_pops_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        for (priority, sequence) in [(5, 0), (8, 1), (5, 2), (1, 3), (8, 4)] {
            heap.push(item(priority, sequence).0);
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|i| i.sequence).collect();
        assert_eq!(order, vec![1, 4, 0, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_delivers_result_once() {
        let (item, rx) = item(5, 42);

        let outcome = item.completion.run().await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_panicking_action_reports_internal_error() {
        let (tx, rx) = oneshot::channel::<GovernorResult<()>>();
        let pending = Pending::new(
            || async {
                if true {
                    panic!("provider client bug");
                }
                Ok::<(), GovernorError>(())
            },
            tx,
        );

        let outcome = Box::new(pending).run().await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        match rx.await.unwrap() {
            Err(GovernorError::Internal(message)) => {
                assert!(message.contains("provider client bug"))
            }
            other => panic!("expected Internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_item_reaches_ticket() {
        let (item, rx) = item(5, 1);
        let ticket = Ticket::new(item.id.clone(), rx);

        item.completion.reject(GovernorError::Internal("gone".into()));

        assert!(matches!(ticket.await, Err(GovernorError::Internal(_))));
    }

    #[test]
    fn test_ticket_pending_until_result_sent() {
        let (tx, rx) = oneshot::channel();
        let mut ticket = tokio_test::task::spawn(Ticket::new(WorkId::new(), rx));

        tokio_test::assert_pending!(ticket.poll());
        tx.send(Ok(3)).unwrap();

        assert!(ticket.is_woken());
        assert_eq!(tokio_test::assert_ready!(ticket.poll()).unwrap(), 3);
    }

    #[test]
    fn test_ticket_reports_lost_sender() {
        let (tx, rx) = oneshot::channel::<GovernorResult<()>>();
        let mut ticket = tokio_test::task::spawn(Ticket::new(WorkId::new(), rx));
        drop(tx);

        let result = tokio_test::assert_ready!(ticket.poll());
        assert!(matches!(result, Err(GovernorError::Internal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let (tx, _rx) = oneshot::channel::<GovernorResult<()>>();
        let pending = Pending::new(|| async { Ok::<(), GovernorError>(()) }, tx);
        let item = WorkItem::new(
            Priority::NORMAL,
            0,
            Some(Duration::from_secs(30)),
            Box::new(pending),
        );

        assert!(!item.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(item.is_expired(Instant::now()));
        assert_eq!(item.waited(Instant::now()), Duration::from_secs(30));
    }
}
