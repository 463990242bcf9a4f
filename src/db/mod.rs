//! Database module for Grid Sentinel.
//!
//! Provides SQLite storage for readings and ledger events.

mod models;
mod store;

pub use models::*;
pub use store::*;
