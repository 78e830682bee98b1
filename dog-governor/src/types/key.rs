use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation key for one request queue: a logical API surface plus the
/// tenant account it is called on behalf of.
///
/// Two keys never share ordering, pacing or (with per-account limiting)
/// rate-limit allowance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    /// Logical API surface name (e.g. "resource-graph", "cost-query")
    pub service: String,

    /// Tenant / account scope
    pub account_id: String,
}

impl QueueKey {
    /// Create a new key from a service name and account id
    pub fn new(service: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account_id: account_id.into(),
        }
    }

    /// Key used when a rate limiter is shared by every account of a service
    pub fn service_wide(&self) -> Self {
        Self::new(self.service.clone(), "*")
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.account_id)
    }
}

impl<S: Into<String>, A: Into<String>> From<(S, A)> for QueueKey {
    fn from((service, account_id): (S, A)) -> Self {
        Self::new(service, account_id)
    }
}
