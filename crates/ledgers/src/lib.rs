//! `mtp-ledgers`: ledger adapters behind one uniform capability.
//!
//! The coordinator only sees [`LedgerAdapter`]; each backend translates the
//! generic operations into its native commands through a narrow transport
//! trait, so real clients and the simulated nodes are interchangeable.

pub mod adapter;
pub mod elements;
pub mod iroha;
pub mod registry;

pub use adapter::{
    AdapterError, AssetRef, LedgerAdapter, LedgerKind, LedgerReceipt, ProvisionedAccount,
    TransportError,
};
pub use elements::{ElementsAdapter, ElementsSettings, SimulatedElements};
pub use iroha::{IrohaAdapter, IrohaSettings, SimulatedIroha};
pub use registry::{AdapterRegistry, RegisteredLedger};
