//! Confidential-asset UTXO ledger backend.

mod adapter;
pub mod rpc;
mod sim;

use serde::{Deserialize, Serialize};

pub use adapter::ElementsAdapter;
pub use rpc::{AddressInfo, ElementsRpc};
pub use sim::SimulatedElements;

/// Decimal places of the ledger's native amounts (satoshi denomination).
pub const NATIVE_DECIMALS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementsSettings {
    /// Wallet holding the issued supply. The node's default wallet is `""`.
    pub base_wallet: String,
    /// Asset label used for balances, sends and reissuance.
    pub asset_label: String,
    /// Appended to a display name to form its wallet name.
    pub wallet_suffix: String,
    /// Whole units reissued on top of a mint's shortfall.
    pub reissue_headroom: u64,
}

impl Default for ElementsSettings {
    fn default() -> Self {
        Self {
            base_wallet: String::new(),
            asset_label: "bitcoin".to_string(),
            wallet_suffix: "_ewallet".to_string(),
            reissue_headroom: 0,
        }
    }
}

impl ElementsSettings {
    pub fn wallet_name(&self, display_name: &str) -> String {
        format!("{display_name}{}", self.wallet_suffix)
    }
}
