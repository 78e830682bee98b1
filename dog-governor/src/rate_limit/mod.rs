//! Sliding-window rate limiting for provider calls.
//!
//! ```text
//! GovernedClient::call_once(key)
//!     → LimiterRegistry::limiter_for(key)   (scope: per account or per service)
//!     → SlidingWindowLimiter::acquire()     (wait until the trailing window has room)
//!     → provider call
//! ```

pub mod registry;
pub mod window;

pub use registry::{LimiterRegistry, LimiterScope};
pub use window::SlidingWindowLimiter;
