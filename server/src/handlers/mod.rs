//! Request handlers for the record views and mutations.

mod listing;
mod map;
mod mutations;
mod stats;
pub mod websocket;

pub use listing::*;
pub use map::*;
pub use mutations::*;
pub use stats::*;
