use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Priority, QueueKey, WorkId};

/// Lifecycle events emitted by the governor for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GovernorEvent {
    /// Work item was admitted to a queue
    Submitted {
        work_id: WorkId,
        key: QueueKey,
        priority: Priority,
        queue_depth: usize,
        at: DateTime<Utc>,
    },

    /// Work item was refused because the queue was full
    Rejected {
        key: QueueKey,
        priority: Priority,
        at: DateTime<Utc>,
    },

    /// Work item was popped and its action started
    Started {
        work_id: WorkId,
        key: QueueKey,
        waited_ms: u64,
        at: DateTime<Utc>,
    },

    /// Action finished successfully
    Completed {
        work_id: WorkId,
        key: QueueKey,
        duration_ms: u64,
        at: DateTime<Utc>,
    },

    /// Action finished with an error (delivered to its caller)
    Failed {
        work_id: WorkId,
        key: QueueKey,
        error: String,
        at: DateTime<Utc>,
    },

    /// Pending work item was rejected by a clear operation
    Cleared {
        work_id: WorkId,
        key: QueueKey,
        at: DateTime<Utc>,
    },

    /// Pending work item waited past its deadline
    Expired {
        work_id: WorkId,
        key: QueueKey,
        waited_ms: u64,
        at: DateTime<Utc>,
    },
}

impl GovernorEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Rejected { .. } => "rejected",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cleared { .. } => "cleared",
            Self::Expired { .. } => "expired",
        }
    }

    /// Get the queue key from any event
    pub fn key(&self) -> &QueueKey {
        match self {
            Self::Submitted { key, .. }
            | Self::Rejected { key, .. }
            | Self::Started { key, .. }
            | Self::Completed { key, .. }
            | Self::Failed { key, .. }
            | Self::Cleared { key, .. }
            | Self::Expired { key, .. } => key,
        }
    }

    /// Get the work ID, if the event concerns an admitted item
    pub fn work_id(&self) -> Option<&WorkId> {
        match self {
            Self::Rejected { .. } => None,
            Self::Submitted { work_id, .. }
            | Self::Started { work_id, .. }
            | Self::Completed { work_id, .. }
            | Self::Failed { work_id, .. }
            | Self::Cleared { work_id, .. }
            | Self::Expired { work_id, .. } => Some(work_id),
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Submitted { at, .. }
            | Self::Rejected { at, .. }
            | Self::Started { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Cleared { at, .. }
            | Self::Expired { at, .. } => at,
        }
    }
}
