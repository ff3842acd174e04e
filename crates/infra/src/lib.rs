//! Infrastructure layer: bookkeeping persistence, identity registry,
//! coordinator, reconciliation and configuration.

pub mod bookkeeping;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod locks;
pub mod reconcile;

pub use bookkeeping::{BookingOutcome, BookkeepingStore, SqliteStore, StoreError};
pub use config::{ConfigError, PlatformConfig};
pub use coordinator::{
    AccountCreation, BookedTransaction, Coordinator, CoordinatorError, LedgerAccountStatus, LedgerEffect,
};
pub use identity::{IdentityRegistry, RegistryError};
pub use reconcile::{
    FileOutOfSyncLog, InMemoryOutOfSyncLog, OutOfSyncLog, ReconcileError, ReconciliationReport,
    ReconciliationReporter,
};

#[cfg(test)]
mod integration_tests;
