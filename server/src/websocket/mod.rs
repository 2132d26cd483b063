//! WebSocket support for live snapshot notifications.
//!
//! Clients connect via WebSocket and are told whenever the record cache
//! publishes a new snapshot, so they can refetch the views they display.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
