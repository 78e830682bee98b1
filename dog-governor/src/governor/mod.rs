//! Per-key priority queues with a single paced worker per key.

mod engine;
mod item;
mod pending;
mod reaper;

pub use engine::RequestGovernor;
pub use item::Ticket;
pub use reaper::{DeadlineReaper, ReaperHandle};
