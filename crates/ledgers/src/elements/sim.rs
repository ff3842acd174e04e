//! In-process confidential-asset UTXO node with a wallet RPC surface.
//!
//! Balances are tracked per wallet rather than per output; that is all the
//! adapter can observe through [`ElementsRpc`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::ElementsSettings;
use super::rpc::{AddressInfo, ElementsRpc, error_code};
use crate::adapter::TransportError;

const RPC_INVALID_ADDRESS: i64 = -5;
const RPC_VERIFY_REJECTED: i64 = -26;

#[derive(Debug, Default)]
struct NodeState {
    /// wallet -> (asset label -> sats)
    wallets: BTreeMap<String, BTreeMap<String, i64>>,
    /// address -> (owning wallet, address info, private key)
    addresses: HashMap<String, (String, AddressInfo, String)>,
}

pub struct SimulatedElements {
    state: Mutex<NodeState>,
    base_wallet: String,
    reissuable: bool,
    latency: Option<Duration>,
    offline: AtomicBool,
    reject_next_send: AtomicBool,
    drop_next_send_response: AtomicBool,
    sequence: AtomicU64,
    reissues: AtomicUsize,
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn wallet_not_found(wallet: &str) -> TransportError {
    TransportError::rpc(
        error_code::WALLET_NOT_FOUND,
        format!("Requested wallet does not exist or is not loaded: {wallet}"),
    )
}

impl SimulatedElements {
    /// A node with the base wallet loaded and holding the reissuance token.
    pub fn new(settings: &ElementsSettings) -> Self {
        let mut state = NodeState::default();
        state.wallets.insert(settings.base_wallet.clone(), BTreeMap::new());
        Self {
            state: Mutex::new(state),
            base_wallet: settings.base_wallet.clone(),
            reissuable: true,
            latency: None,
            offline: AtomicBool::new(false),
            reject_next_send: AtomicBool::new(false),
            drop_next_send_response: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            reissues: AtomicUsize::new(0),
        }
    }

    pub fn without_reissuance_token(mut self) -> Self {
        self.reissuable = false;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next send is rejected by the node without effect.
    pub fn fail_next_tx(&self) {
        self.reject_next_send.store(true, Ordering::SeqCst);
    }

    /// The next send is broadcast but its response is lost.
    pub fn drop_next_send_response(&self) {
        self.drop_next_send_response.store(true, Ordering::SeqCst);
    }

    pub fn reissue_count(&self) -> usize {
        self.reissues.load(Ordering::SeqCst)
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn round_trip(&self) -> Result<(), TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("node is offline".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, NodeState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Protocol("node state poisoned".to_string()))
    }
}

#[async_trait]
impl ElementsRpc for SimulatedElements {
    async fn list_wallets(&self) -> Result<Vec<String>, TransportError> {
        self.round_trip().await?;
        Ok(self.lock()?.wallets.keys().cloned().collect())
    }

    async fn create_wallet(&self, wallet: &str) -> Result<(), TransportError> {
        self.round_trip().await?;
        let mut state = self.lock()?;
        if state.wallets.contains_key(wallet) {
            return Err(TransportError::rpc(
                error_code::WALLET_ERROR,
                format!("Wallet {wallet} already exists."),
            ));
        }
        state.wallets.insert(wallet.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn get_new_address(&self, wallet: &str) -> Result<String, TransportError> {
        self.round_trip().await?;
        let seq = self.next_seq().to_string();
        let mut state = self.lock()?;
        if !state.wallets.contains_key(wallet) {
            return Err(wallet_not_found(wallet));
        }
        let unconfidential = format!("ert1q{}", &digest(&["addr", wallet, &seq])[..38]);
        let info = AddressInfo {
            address: format!("el1qq{}", &digest(&["ct", wallet, &seq])[..58]),
            confidential_key: digest(&["blind", wallet, &seq]),
            unconfidential,
        };
        let private_key = digest(&["priv", wallet, &seq]);
        let address = info.address.clone();
        state
            .addresses
            .insert(info.unconfidential.clone(), (wallet.to_string(), info.clone(), private_key.clone()));
        state
            .addresses
            .insert(address.clone(), (wallet.to_string(), info, private_key));
        Ok(address)
    }

    async fn get_address_info(&self, wallet: &str, address: &str) -> Result<AddressInfo, TransportError> {
        self.round_trip().await?;
        let state = self.lock()?;
        match state.addresses.get(address) {
            Some((owner, info, _)) if owner == wallet => Ok(info.clone()),
            _ => Err(TransportError::rpc(RPC_INVALID_ADDRESS, "Invalid address")),
        }
    }

    async fn dump_priv_key(&self, wallet: &str, address: &str) -> Result<String, TransportError> {
        self.round_trip().await?;
        let state = self.lock()?;
        match state.addresses.get(address) {
            Some((owner, _, key)) if owner == wallet => Ok(key.clone()),
            _ => Err(TransportError::rpc(RPC_INVALID_ADDRESS, "Address does not refer to a key")),
        }
    }

    async fn get_balance(&self, wallet: &str, asset_label: &str) -> Result<i64, TransportError> {
        self.round_trip().await?;
        let state = self.lock()?;
        let held = state.wallets.get(wallet).ok_or_else(|| wallet_not_found(wallet))?;
        Ok(held.get(asset_label).copied().unwrap_or(0))
    }

    async fn reissue_asset(&self, wallet: &str, asset_label: &str, amount: i64) -> Result<String, TransportError> {
        self.round_trip().await?;
        if !self.reissuable || wallet != self.base_wallet {
            return Err(TransportError::rpc(
                error_code::INVALID_PARAMETER,
                format!("No available reissuance tokens in wallet for {asset_label}"),
            ));
        }
        let seq = self.next_seq().to_string();
        let mut state = self.lock()?;
        let held = state.wallets.get_mut(wallet).ok_or_else(|| wallet_not_found(wallet))?;
        *held.entry(asset_label.to_string()).or_insert(0) += amount;
        self.reissues.fetch_add(1, Ordering::SeqCst);
        Ok(digest(&["reissue", wallet, &seq]))
    }

    async fn send_to_address(
        &self,
        wallet: &str,
        address: &str,
        amount: i64,
        asset_label: &str,
        comment: &str,
    ) -> Result<String, TransportError> {
        self.round_trip().await?;
        if self.reject_next_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::rpc(RPC_VERIFY_REJECTED, "transaction rejected by node"));
        }
        if amount <= 0 {
            return Err(TransportError::rpc(-3, "Invalid amount for send"));
        }
        let seq = self.next_seq().to_string();
        let mut state = self.lock()?;
        let dest_wallet = match state.addresses.get(address) {
            Some((owner, _, _)) => owner.clone(),
            None => return Err(TransportError::rpc(RPC_INVALID_ADDRESS, "Invalid address")),
        };
        let source = state.wallets.get(wallet).ok_or_else(|| wallet_not_found(wallet))?;
        if source.get(asset_label).copied().unwrap_or(0) < amount {
            return Err(TransportError::rpc(error_code::WALLET_INSUFFICIENT_FUNDS, "Insufficient funds"));
        }
        if let Some(held) = state.wallets.get_mut(wallet) {
            *held.entry(asset_label.to_string()).or_insert(0) -= amount;
        }
        if let Some(held) = state.wallets.get_mut(&dest_wallet) {
            *held.entry(asset_label.to_string()).or_insert(0) += amount;
        }
        drop(state);

        let txid = digest(&["send", wallet, address, &amount.to_string(), comment, &seq]);
        if self.drop_next_send_response.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Timeout(format!("response for {txid} lost")));
        }
        Ok(txid)
    }
}
