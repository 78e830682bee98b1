use serde::{Deserialize, Serialize};

use super::QueueKey;

/// Point-in-time view of one key's queue, for observability only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub key: QueueKey,

    /// Items waiting to run (excludes the one currently executing)
    pub queue_depth: usize,

    /// Whether a worker loop is active for this key
    pub is_processing: bool,

    /// Age of the oldest pending item, `None` when nothing is pending
    pub oldest_pending_age_ms: Option<u64>,
}

impl QueueStatus {
    /// Status of a key with no live queue state
    pub fn idle(key: QueueKey) -> Self {
        Self {
            key,
            queue_depth: 0,
            is_processing: false,
            oldest_pending_age_ms: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.is_processing && self.queue_depth == 0
    }
}
