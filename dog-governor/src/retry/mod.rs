//! Retry subsystem.
//!
//! ```text
//! provider call fails
//!     → classify (ErrorClass::Retryable / ErrorClass::Fatal)
//!     → Fatal: surface immediately
//!     → Retryable: backoff.rs computes the delay, executor.rs sleeps and retries
//!     → budget exhausted: ExhaustedRetries wrapping the last cause
//! ```

pub mod backoff;
pub mod executor;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use executor::{RetryAttemptState, RetryExecutor};
