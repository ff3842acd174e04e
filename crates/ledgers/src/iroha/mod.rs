//! Account-based ledger backend.

mod adapter;
mod sim;
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::adapter::AssetRef;

pub use adapter::IrohaAdapter;
pub use sim::SimulatedIroha;
pub use transport::{IrohaCommand, IrohaTransaction, IrohaTransport, TxStatus};

/// Connection-independent settings of an account-based ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrohaSettings {
    /// Domain every platform account is created in.
    pub domain: String,
    pub asset_name: String,
    /// Fractional digits of the asset; at least the platform's two.
    pub precision: u32,
    /// Account that creates accounts/assets and issues supply.
    pub admin_account: String,
}

impl Default for IrohaSettings {
    fn default() -> Self {
        Self {
            domain: "test".to_string(),
            asset_name: "coin".to_string(),
            precision: 2,
            admin_account: "admin@test".to_string(),
        }
    }
}

impl IrohaSettings {
    /// `<asset_name>#<domain>`
    pub fn asset_id(&self) -> AssetRef {
        AssetRef::new(format!("{}#{}", self.asset_name, self.domain))
    }
}
