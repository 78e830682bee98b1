//! The external control-plane API and the governed client wrapped around it.

pub mod api;
pub mod client;

pub use api::ControlPlaneApi;
pub use client::GovernedClient;
