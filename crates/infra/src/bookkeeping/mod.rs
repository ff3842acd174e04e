//! Durable bookkeeping store boundary.
//!
//! The coordinator writes through [`BookkeepingStore`]; [`SqliteStore`] is
//! the production backend and the one tests run against (in memory).

pub mod schema;
pub mod sqlite;
pub mod r#trait;

pub use r#trait::{BookingOutcome, BookkeepingStore, StoreError};
pub use sqlite::SqliteStore;
