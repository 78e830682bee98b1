pub mod ids;
pub mod key;
pub mod priority;
pub mod status;
pub mod events;

pub use ids::WorkId;
pub use key::QueueKey;
pub use priority::Priority;
pub use status::QueueStatus;
pub use events::GovernorEvent;
