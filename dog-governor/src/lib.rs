//! # dog-governor: Outbound Request Governance for Control-Plane APIs
//!
//! **Per-account queues, sliding-window rate limits and retry classification
//! for multi-tenant API clients**
//!
//! Cloud control-plane APIs throttle per caller and per account. dog-governor
//! sits between your code and such an API and keeps every tenant inside its
//! allowance without letting one tenant starve another:
//!
//! - **Per-Key Queues**: one priority queue per (service, account); higher
//!   priority first, strict FIFO among equals, bounded with `QueueFull`
//!   rejection instead of unbounded buffering
//! - **One Worker per Key**: work for a key runs one item at a time with a
//!   pacing pause, while different keys proceed independently
//! - **Sliding-Window Limiting**: at most N call starts in any trailing
//!   window, never a fixed bucket that bursts at the boundary
//! - **Retry Classification**: 429/503/network failures back off and retry,
//!   400/401/403 fail immediately
//! - **Transparent Pagination**: continuation tokens followed up to a record cap
//! - **Structured Observability**: lifecycle event stream, live counters and
//!   `tracing` spans per work item
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_governor::prelude::*;
//!
//! struct InventoryApi;
//!
//! #[async_trait]
//! impl ControlPlaneApi for InventoryApi {
//!     type Request = String;
//!     type Row = String;
//!
//!     async fn call(
//!         &self,
//!         query: &String,
//!         _cursor: Option<&str>,
//!     ) -> Result<Page<String>, ProviderError> {
//!         Ok(Page::last(vec![format!("result of {}", query)]))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> GovernorResult<()> {
//! let governor = RequestGovernor::new();
//! let client = GovernedClient::for_governor(InventoryApi, &governor);
//!
//! let rows = client
//!     .submit_query(
//!         &governor,
//!         QueueKey::new("resource-graph", "account-42"),
//!         Priority::HIGH,
//!         "resources | limit 10".to_string(),
//!         None,
//!     )
//!     .await?;
//!
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod governor;
pub mod observability;
pub mod pagination;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod types;

// Core API exports
pub use config::GovernorConfig;
pub use error::{ErrorClass, GovernorError, GovernorResult, ProviderError};
pub use governor::{DeadlineReaper, ReaperHandle, RequestGovernor, Ticket};
pub use pagination::{Page, PageCursor, PageSet, Paginator};
pub use provider::{ControlPlaneApi, GovernedClient};
pub use rate_limit::{LimiterRegistry, LimiterScope, SlidingWindowLimiter};
pub use retry::{BackoffPolicy, BackoffStrategy, RetryExecutor};
pub use types::{GovernorEvent, Priority, QueueKey, QueueStatus, WorkId};

// Observability exports
pub use observability::{GovernorMetrics, MetricsSnapshot, ObservabilityLayer};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything needed to govern calls to a control-plane API
pub mod prelude {
    // Governor and client
    pub use crate::{ControlPlaneApi, GovernedClient, RequestGovernor};

    // Essential types
    pub use crate::{
        GovernorConfig, GovernorError, GovernorResult, Page, PageSet, Priority, ProviderError,
        QueueKey, QueueStatus,
    };

    // Observability
    pub use crate::{GovernorEvent, GovernorMetrics};

    // Essential traits
    pub use async_trait::async_trait;
}
