//! Structured logging, lifecycle events and live counters.

pub mod events;
pub mod metrics;
pub mod tracing;

pub use events::{BoxStream, ObservabilityLayer};
pub use metrics::{GovernorMetrics, MetricsSnapshot, ServiceMetrics};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
