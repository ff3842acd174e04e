//! Narrow wallet RPC surface of a confidential-asset UTXO node.
//!
//! Amounts cross this boundary in native base units (see
//! [`NATIVE_DECIMALS`](super::NATIVE_DECIMALS)).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::TransportError;

/// JSON-RPC error codes the adapter interprets.
pub mod error_code {
    /// Wallet already exists / could not be created.
    pub const WALLET_ERROR: i64 = -4;
    /// Insufficient funds in the sending wallet.
    pub const WALLET_INSUFFICIENT_FUNDS: i64 = -6;
    /// Invalid parameter; reissuance token missing from the wallet.
    pub const INVALID_PARAMETER: i64 = -8;
    pub const WALLET_NOT_FOUND: i64 = -18;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub confidential_key: String,
    pub unconfidential: String,
}

#[async_trait]
pub trait ElementsRpc: Send + Sync {
    async fn list_wallets(&self) -> Result<Vec<String>, TransportError>;

    async fn create_wallet(&self, wallet: &str) -> Result<(), TransportError>;

    async fn get_new_address(&self, wallet: &str) -> Result<String, TransportError>;

    async fn get_address_info(&self, wallet: &str, address: &str) -> Result<AddressInfo, TransportError>;

    async fn dump_priv_key(&self, wallet: &str, address: &str) -> Result<String, TransportError>;

    async fn get_balance(&self, wallet: &str, asset_label: &str) -> Result<i64, TransportError>;

    /// Increase the supply of `asset_label` held by `wallet`; returns the txid.
    async fn reissue_asset(&self, wallet: &str, asset_label: &str, amount: i64) -> Result<String, TransportError>;

    /// Returns the txid.
    async fn send_to_address(
        &self,
        wallet: &str,
        address: &str,
        amount: i64,
        asset_label: &str,
        comment: &str,
    ) -> Result<String, TransportError>;
}
