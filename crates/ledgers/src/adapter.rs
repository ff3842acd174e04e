//! The uniform ledger capability the coordinator drives.
//!
//! Every supported ledger type implements [`LedgerAdapter`]. Adapters are
//! stateless facades: the authoritative state lives on the external ledger.
//!
//! ## Outcome contract
//!
//! - `Ok(..)` is a durable fact on the ledger. Callers must never blindly
//!   re-issue a call that succeeded (a replayed mint mints twice).
//! - Every `Err(..)` except [`AdapterError::Indeterminate`] means the ledger
//!   state was not changed by the call.
//! - `Indeterminate` is reserved for submissions whose outcome could not be
//!   established (e.g. the connection dropped after the transaction was sent).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mtp_core::{Amount, Credentials, LocalAccountId, LocalTxId};

/// Broad family of a ledger backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Account/balance ledger with native consensus (e.g. Iroha).
    AccountBased,
    /// Confidential-asset UTXO ledger (e.g. Elements).
    Utxo,
}

/// Ledger-native reference to the asset being minted or moved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(asset: impl Into<String>) -> Self {
        Self(asset.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freshly provisioned ledger account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub local_account_id: LocalAccountId,
    pub credentials: Credentials,
}

/// Proof that a mint/transfer is committed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub local_tx_id: LocalTxId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The account is already present on the ledger (non-fatal for callers).
    #[error("account already exists on ledger: {local_account_id}")]
    AlreadyExists { local_account_id: LocalAccountId },

    #[error("insufficient supply: {0}")]
    InsufficientSupply(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The ledger rejected the operation; nothing was committed.
    #[error("ledger aborted operation: {0}")]
    Aborted(String),

    /// The ledger could not be reached; nothing was submitted.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("not found on ledger: {0}")]
    NotFound(String),

    /// The request was malformed for this ledger and never submitted.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Submitted, but the outcome could not be determined.
    #[error("ledger outcome unknown: {0}")]
    Indeterminate(String),
}

impl AdapterError {
    /// Whether the ledger may hold an effect of the failed call.
    pub fn may_have_committed(&self) -> bool {
        matches!(self, AdapterError::Indeterminate(_))
    }
}

/// Errors raised by the transports adapters talk through (RPC, gRPC, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Error returned by the node itself (JSON-RPC style code + message).
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }
}

/// Map a transport failure that happened before anything was submitted.
pub(crate) fn before_submission(err: TransportError) -> AdapterError {
    match err {
        TransportError::Rpc { code, message } => AdapterError::Aborted(format!("rpc {code}: {message}")),
        other => AdapterError::Unavailable(other.to_string()),
    }
}

/// Uniform capability over one ledger type.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    fn kind(&self) -> LedgerKind;

    /// Asset minted when the caller does not name one.
    fn default_asset(&self) -> AssetRef;

    /// Provision an account for `display_name`.
    ///
    /// Checks the ledger first and returns [`AdapterError::AlreadyExists`]
    /// carrying the existing local id instead of creating a duplicate.
    async fn create_account(&self, display_name: &str) -> Result<ProvisionedAccount, AdapterError>;

    /// Mint `amount` of `asset` into `dest`.
    ///
    /// Any supply-increase step the ledger needs happens inside this call; on
    /// success the funds are irrevocably at `dest`.
    async fn mint(
        &self,
        dest: &LocalAccountId,
        amount: Amount,
        asset: &AssetRef,
    ) -> Result<LedgerReceipt, AdapterError>;

    async fn transfer(
        &self,
        from: &LocalAccountId,
        to: &LocalAccountId,
        amount: Amount,
        memo: &str,
    ) -> Result<LedgerReceipt, AdapterError>;

    /// Ledger-side balance of the default asset.
    async fn query_balance(&self, account: &LocalAccountId) -> Result<Amount, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_indeterminate_errors_may_have_committed() {
        assert!(AdapterError::Indeterminate("x".into()).may_have_committed());
        assert!(!AdapterError::Unavailable("x".into()).may_have_committed());
        assert!(!AdapterError::Aborted("x".into()).may_have_committed());
    }

    #[test]
    fn rpc_errors_before_submission_are_aborts() {
        assert!(matches!(
            before_submission(TransportError::rpc(-18, "wallet not found")),
            AdapterError::Aborted(_)
        ));
        assert!(matches!(
            before_submission(TransportError::Timeout("5s".into())),
            AdapterError::Unavailable(_)
        ));
    }
}
