//! Database module for PostgreSQL persistence.

mod listener;
mod pool;
mod store;

pub use listener::*;
pub use pool::*;
pub use store::*;
