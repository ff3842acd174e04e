//! `mtp-core`: domain building blocks of the multi-ledger platform.
//!
//! This crate contains **pure domain** types (no ledger IO, no persistence).

pub mod amount;
pub mod error;
pub mod id;
pub mod identity;
pub mod ledger;
pub mod transaction;

pub use amount::Amount;
pub use error::{DomainError, DomainResult};
pub use id::{GlobalId, GlobalTxId, LedgerId, LocalAccountId, LocalTxId, OperationId};
pub use identity::{Credentials, Identity, LedgerBinding, UtxoAddress, validate_name};
pub use ledger::{Ledger, default_ledgers};
pub use transaction::{Balance, Booking, Participant, RequestState, TransactionRecord, TxKind};
