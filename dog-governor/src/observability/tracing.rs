//! Tracing setup and span helpers.

use tracing::Span;

use crate::types::{Priority, QueueKey, WorkId};

/// Span wrapping the execution of one work item
pub fn work_span(key: &QueueKey, work_id: &WorkId, priority: Priority) -> Span {
    tracing::info_span!(
        "governor.work",
        key = %key,
        work_id = %work_id,
        priority = priority.as_u8(),
    )
}

/// Span wrapping one key's worker loop
pub fn worker_span(key: &QueueKey) -> Span {
    tracing::debug_span!("governor.worker", key = %key)
}

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `dog_governor=info`. Set `json` for machine-readable output.
///
/// Subsequent calls are no-ops.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dog_governor=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().with_target(false).try_init()
    } else {
        builder.try_init()
    };
}
