//! In-process account-based ledger peer.
//!
//! Executes commands atomically per transaction and reports the same status
//! stream a real peer would. Fault switches let tests reproduce unreachable
//! peers, rejected submissions and lost responses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::IrohaSettings;
use super::transport::{
    AccountInfo, AssetInfo, IrohaCommand, IrohaTransaction, IrohaTransport, TxStatus, error_code,
};
use crate::adapter::TransportError;

#[derive(Debug, Clone, Default)]
struct PeerState {
    accounts: BTreeMap<String, AccountInfo>,
    assets: BTreeMap<String, AssetInfo>,
    /// (account, asset) -> quantity in asset base units.
    holdings: BTreeMap<(String, String), i64>,
    issued: BTreeMap<String, i64>,
}

impl PeerState {
    fn holding(&self, account: &str, asset: &str) -> i64 {
        self.holdings
            .get(&(account.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn adjust(&mut self, account: &str, asset: &str, delta: i64) {
        *self
            .holdings
            .entry((account.to_string(), asset.to_string()))
            .or_insert(0) += delta;
    }
}

fn parse_quantity(text: &str, precision: u32) -> Option<i64> {
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() || frac.len() > precision as usize {
        return None;
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{whole}{frac:0<width$}", width = precision as usize);
    padded.parse().ok().filter(|q: &i64| *q > 0)
}

fn format_quantity(units: i64, precision: u32) -> String {
    if precision == 0 {
        return units.to_string();
    }
    let factor = 10i64.pow(precision);
    format!(
        "{}.{:0width$}",
        units / factor,
        units % factor,
        width = precision as usize
    )
}

pub struct SimulatedIroha {
    state: Mutex<PeerState>,
    statuses: Mutex<HashMap<String, TxStatus>>,
    /// Upper bound on the issued quantity of any asset, in base units.
    supply_cap: i64,
    latency: Option<Duration>,
    offline: AtomicBool,
    reject_next: AtomicBool,
    drop_next_response: AtomicBool,
    disconnect_after_next: AtomicBool,
    time_out_next_send: AtomicBool,
    committed: AtomicUsize,
}

impl SimulatedIroha {
    /// A peer whose admin account already exists in the settings' domain.
    pub fn new(settings: &IrohaSettings) -> Self {
        let mut state = PeerState::default();
        state.accounts.insert(
            settings.admin_account.clone(),
            AccountInfo {
                account_id: settings.admin_account.clone(),
                domain_id: settings.domain.clone(),
                quorum: 1,
            },
        );
        Self {
            state: Mutex::new(state),
            statuses: Mutex::new(HashMap::new()),
            supply_cap: i64::MAX / 2,
            latency: None,
            offline: AtomicBool::new(false),
            reject_next: AtomicBool::new(false),
            drop_next_response: AtomicBool::new(false),
            disconnect_after_next: AtomicBool::new(false),
            time_out_next_send: AtomicBool::new(false),
            committed: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_supply_cap(mut self, cap_base_units: i64) -> Self {
        self.supply_cap = cap_base_units;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next submission fails stateful validation without effect.
    pub fn fail_next_tx(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// The next submission commits but its response is lost in transit.
    pub fn drop_next_response(&self) {
        self.drop_next_response.store(true, Ordering::SeqCst);
    }

    /// The next submission commits and the peer then goes offline.
    pub fn disconnect_after_next_commit(&self) {
        self.disconnect_after_next.store(true, Ordering::SeqCst);
    }

    /// The next submission times out before the peer records it.
    pub fn time_out_next_send(&self) {
        self.time_out_next_send.store(true, Ordering::SeqCst);
    }

    pub fn tx_count_committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> Result<(), TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("peer is offline".to_string()));
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, PeerState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Protocol("peer state poisoned".to_string()))
    }

    fn execute(&self, state: &mut PeerState, tx: &IrohaTransaction) -> Result<(), (usize, u32)> {
        if !state.accounts.contains_key(&tx.creator_account_id) {
            return Err((0, error_code::NO_SUCH_SOURCE_ACCOUNT));
        }
        for (index, command) in tx.commands.iter().enumerate() {
            self.apply(state, &tx.creator_account_id, command)
                .map_err(|code| (index, code))?;
        }
        Ok(())
    }

    fn apply(&self, state: &mut PeerState, creator: &str, command: &IrohaCommand) -> Result<(), u32> {
        match command {
            IrohaCommand::CreateAccount {
                account_name,
                domain_id,
                ..
            } => {
                let account_id = format!("{account_name}@{domain_id}");
                if state.accounts.contains_key(&account_id) {
                    return Err(error_code::ALREADY_EXISTS);
                }
                state.accounts.insert(
                    account_id.clone(),
                    AccountInfo {
                        account_id,
                        domain_id: domain_id.clone(),
                        quorum: 1,
                    },
                );
            }
            IrohaCommand::CreateAsset {
                asset_name,
                domain_id,
                precision,
            } => {
                let asset_id = format!("{asset_name}#{domain_id}");
                if state.assets.contains_key(&asset_id) {
                    return Err(error_code::ALREADY_EXISTS);
                }
                state.assets.insert(
                    asset_id.clone(),
                    AssetInfo {
                        asset_id,
                        domain_id: domain_id.clone(),
                        precision: *precision,
                    },
                );
            }
            IrohaCommand::AddAssetQuantity { asset_id, amount } => {
                let precision = state
                    .assets
                    .get(asset_id)
                    .map(|a| a.precision)
                    .ok_or(error_code::NO_SUCH_ASSET)?;
                let quantity = parse_quantity(amount, precision).ok_or(error_code::COULD_NOT_PERFORM)?;
                let issued = state.issued.get(asset_id).copied().unwrap_or(0);
                let total = issued
                    .checked_add(quantity)
                    .filter(|t| *t <= self.supply_cap)
                    .ok_or(error_code::SUPPLY_OVERFLOW)?;
                state.issued.insert(asset_id.clone(), total);
                state.adjust(creator, asset_id, quantity);
            }
            IrohaCommand::TransferAsset {
                src_account_id,
                dest_account_id,
                asset_id,
                amount,
                ..
            } => {
                if !state.accounts.contains_key(src_account_id) {
                    return Err(error_code::NO_SUCH_SOURCE_ACCOUNT);
                }
                if !state.accounts.contains_key(dest_account_id) {
                    return Err(error_code::NO_SUCH_DESTINATION_ACCOUNT);
                }
                let precision = state
                    .assets
                    .get(asset_id)
                    .map(|a| a.precision)
                    .ok_or(error_code::NO_SUCH_ASSET)?;
                let quantity = parse_quantity(amount, precision).ok_or(error_code::COULD_NOT_PERFORM)?;
                if state.holding(src_account_id, asset_id) < quantity {
                    return Err(error_code::NOT_ENOUGH_BALANCE);
                }
                state.adjust(src_account_id, asset_id, -quantity);
                state.adjust(dest_account_id, asset_id, quantity);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IrohaTransport for SimulatedIroha {
    async fn get_account(&self, account_id: &str) -> Result<Option<AccountInfo>, TransportError> {
        self.round_trip().await?;
        Ok(self.lock_state()?.accounts.get(account_id).cloned())
    }

    async fn get_asset_info(&self, asset_id: &str) -> Result<Option<AssetInfo>, TransportError> {
        self.round_trip().await?;
        Ok(self.lock_state()?.assets.get(asset_id).cloned())
    }

    async fn get_account_asset(
        &self,
        account_id: &str,
        asset_id: &str,
    ) -> Result<Option<String>, TransportError> {
        self.round_trip().await?;
        let state = self.lock_state()?;
        let Some(asset) = state.assets.get(asset_id) else {
            return Ok(None);
        };
        let key = (account_id.to_string(), asset_id.to_string());
        Ok(state
            .holdings
            .get(&key)
            .map(|units| format_quantity(*units, asset.precision)))
    }

    async fn send_tx(&self, tx: &IrohaTransaction) -> Result<Vec<TxStatus>, TransportError> {
        self.round_trip().await?;
        let hash = tx.hash()?;
        if self.time_out_next_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Timeout(format!("no answer while sending tx {hash}")));
        }

        let mut stream = Vec::new();
        if tx.commands.is_empty() || tx.created_time <= 0 {
            stream.push(TxStatus::StatelessValidationFailed);
            return Ok(stream);
        }
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| TransportError::Protocol("status table poisoned".to_string()))?;
        if statuses.contains_key(&hash) {
            // Replayed payload.
            stream.push(TxStatus::StatelessValidationFailed);
            return Ok(stream);
        }
        stream.push(TxStatus::StatelessValidationSuccess);

        let final_status = if self.reject_next.swap(false, Ordering::SeqCst) {
            TxStatus::StatefulValidationFailed {
                command_index: 0,
                error_code: error_code::COULD_NOT_PERFORM,
            }
        } else {
            let mut state = self.lock_state()?;
            let mut scratch = state.clone();
            match self.execute(&mut scratch, tx) {
                Ok(()) => {
                    *state = scratch;
                    self.committed.fetch_add(1, Ordering::SeqCst);
                    TxStatus::Committed
                }
                Err((command_index, error_code)) => TxStatus::StatefulValidationFailed {
                    command_index,
                    error_code,
                },
            }
        };
        statuses.insert(hash.clone(), final_status.clone());
        drop(statuses);

        if final_status == TxStatus::Committed {
            stream.push(TxStatus::StatefulValidationSuccess);
        }
        stream.push(final_status);

        if self.disconnect_after_next.swap(false, Ordering::SeqCst) {
            self.set_offline(true);
            return Err(TransportError::Timeout(format!("connection lost awaiting tx {hash}")));
        }
        if self.drop_next_response.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Timeout(format!("response for tx {hash} lost")));
        }
        Ok(stream)
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<Option<TxStatus>, TransportError> {
        self.round_trip().await?;
        let statuses = self
            .statuses
            .lock()
            .map_err(|_| TransportError::Protocol("status table poisoned".to_string()))?;
        Ok(statuses.get(tx_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(src: &str, dest: &str, amount: &str) -> IrohaCommand {
        IrohaCommand::TransferAsset {
            src_account_id: src.into(),
            dest_account_id: dest.into(),
            asset_id: "coin#test".into(),
            description: String::new(),
            amount: amount.into(),
        }
    }

    #[tokio::test]
    async fn failed_command_rolls_back_whole_transaction() {
        let node = SimulatedIroha::new(&IrohaSettings::default());
        let setup = IrohaTransaction::new(
            "admin@test",
            1,
            vec![
                IrohaCommand::CreateAsset {
                    asset_name: "coin".into(),
                    domain_id: "test".into(),
                    precision: 2,
                },
                IrohaCommand::AddAssetQuantity {
                    asset_id: "coin#test".into(),
                    amount: "10.00".into(),
                },
            ],
        );
        assert_eq!(node.send_tx(&setup).await.unwrap().last(), Some(&TxStatus::Committed));

        // Second command overdraws, so the first must not stick either.
        let tx = IrohaTransaction::new(
            "admin@test",
            2,
            vec![
                IrohaCommand::AddAssetQuantity {
                    asset_id: "coin#test".into(),
                    amount: "5".into(),
                },
                transfer("admin@test", "admin@test", "100"),
            ],
        );
        let stream = node.send_tx(&tx).await.unwrap();
        assert_eq!(
            stream.last(),
            Some(&TxStatus::StatefulValidationFailed {
                command_index: 1,
                error_code: error_code::NOT_ENOUGH_BALANCE
            })
        );
        let held = node.get_account_asset("admin@test", "coin#test").await.unwrap();
        assert_eq!(held.as_deref(), Some("10.00"));
    }

    #[tokio::test]
    async fn replayed_payload_is_rejected() {
        let node = SimulatedIroha::new(&IrohaSettings::default());
        let tx = IrohaTransaction::new(
            "admin@test",
            7,
            vec![IrohaCommand::CreateAccount {
                account_name: "alice".into(),
                domain_id: "test".into(),
                public_key: "00".into(),
            }],
        );
        assert_eq!(node.send_tx(&tx).await.unwrap().last(), Some(&TxStatus::Committed));
        assert_eq!(
            node.send_tx(&tx).await.unwrap(),
            vec![TxStatus::StatelessValidationFailed]
        );
        assert_eq!(node.tx_count_committed(), 1);
    }

    #[test]
    fn quantities_respect_precision() {
        assert_eq!(parse_quantity("1.5", 2), Some(150));
        assert_eq!(parse_quantity("1.555", 2), None);
        assert_eq!(parse_quantity("0", 2), None);
        assert_eq!(format_quantity(4450, 2), "44.50");
    }
}
