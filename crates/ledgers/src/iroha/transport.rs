//! Wire-level vocabulary of the account-based ledger.
//!
//! The adapter speaks in these terms; a concrete transport (gRPC client,
//! simulated node) carries them to a peer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::adapter::TransportError;

/// Error codes reported with `StatefulValidationFailed`.
pub mod error_code {
    /// Generic "could not perform command".
    pub const COULD_NOT_PERFORM: u32 = 1;
    pub const NO_SUCH_SOURCE_ACCOUNT: u32 = 3;
    pub const NO_SUCH_DESTINATION_ACCOUNT: u32 = 4;
    pub const NO_SUCH_ASSET: u32 = 5;
    /// `TransferAsset`: source balance too low.
    pub const NOT_ENOUGH_BALANCE: u32 = 6;
    /// `AddAssetQuantity`: asset quantity would overflow its cap.
    pub const SUPPLY_OVERFLOW: u32 = 7;
    /// `CreateAccount` / `CreateAsset`: already present.
    pub const ALREADY_EXISTS: u32 = 8;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "PascalCase")]
pub enum IrohaCommand {
    CreateAccount {
        account_name: String,
        domain_id: String,
        public_key: String,
    },
    CreateAsset {
        asset_name: String,
        domain_id: String,
        precision: u32,
    },
    AddAssetQuantity {
        asset_id: String,
        amount: String,
    },
    TransferAsset {
        src_account_id: String,
        dest_account_id: String,
        asset_id: String,
        description: String,
        amount: String,
    },
}

/// Transaction payload (signatures are attached by the transport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrohaTransaction {
    pub creator_account_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_time: i64,
    pub commands: Vec<IrohaCommand>,
}

impl IrohaTransaction {
    pub fn new(creator_account_id: impl Into<String>, created_time: i64, commands: Vec<IrohaCommand>) -> Self {
        Self {
            creator_account_id: creator_account_id.into(),
            created_time,
            commands,
        }
    }

    /// Hex digest of the serialized payload; the ledger's transaction id.
    pub fn hash(&self) -> Result<String, TransportError> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| TransportError::Protocol(format!("payload serialization failed: {e}")))?;
        Ok(hex::encode(Sha256::digest(&payload)))
    }
}

/// Status stream entries emitted while a transaction moves through the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    StatelessValidationFailed,
    StatelessValidationSuccess,
    StatefulValidationFailed { command_index: usize, error_code: u32 },
    StatefulValidationSuccess,
    Committed,
    Rejected,
    NotReceived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub domain_id: String,
    pub quorum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub asset_id: String,
    pub domain_id: String,
    pub precision: u32,
}

/// Narrow client surface of an account-based ledger peer.
#[async_trait]
pub trait IrohaTransport: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<Option<AccountInfo>, TransportError>;

    async fn get_asset_info(&self, asset_id: &str) -> Result<Option<AssetInfo>, TransportError>;

    /// Balance of `asset_id` held by `account_id`, in the asset's decimal notation.
    async fn get_account_asset(
        &self,
        account_id: &str,
        asset_id: &str,
    ) -> Result<Option<String>, TransportError>;

    /// Submit `tx` and collect its status stream until a final status.
    async fn send_tx(&self, tx: &IrohaTransaction) -> Result<Vec<TxStatus>, TransportError>;

    /// Final status of an earlier submission, if the peer knows the hash.
    async fn tx_status(&self, tx_hash: &str) -> Result<Option<TxStatus>, TransportError>;
}
