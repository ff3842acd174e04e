use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing::{debug, instrument, warn};

use mtp_core::{Amount, Credentials, LocalAccountId, LocalTxId};

use super::IrohaSettings;
use super::transport::{IrohaCommand, IrohaTransaction, IrohaTransport, TxStatus, error_code};
use crate::adapter::{
    AdapterError, AssetRef, LedgerAdapter, LedgerKind, LedgerReceipt, ProvisionedAccount,
    TransportError, before_submission,
};

/// How a submitted transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Committed,
    StatelessRejected,
    StatefulRejected { command_index: usize, error_code: u32 },
    /// The peer reported no final status.
    Unsettled(String),
}

fn final_outcome(statuses: &[TxStatus]) -> Outcome {
    if statuses.iter().any(|s| *s == TxStatus::Committed) {
        return Outcome::Committed;
    }
    for status in statuses {
        match status {
            TxStatus::StatelessValidationFailed => return Outcome::StatelessRejected,
            TxStatus::StatefulValidationFailed {
                command_index,
                error_code,
            } => {
                return Outcome::StatefulRejected {
                    command_index: *command_index,
                    error_code: *error_code,
                };
            }
            TxStatus::Rejected => {
                return Outcome::StatefulRejected {
                    command_index: 0,
                    error_code: error_code::COULD_NOT_PERFORM,
                };
            }
            _ => {}
        }
    }
    Outcome::Unsettled(format!("last status {:?}", statuses.last()))
}

/// Adapter for an account-based ledger (Iroha-style commands and queries).
///
/// Accounts are `<name>@<domain>`; minting adds quantity to the admin
/// account and transfers it to the destination in the same transaction.
pub struct IrohaAdapter<T> {
    transport: Arc<T>,
    settings: IrohaSettings,
    last_created_time: AtomicI64,
}

impl<T: IrohaTransport> IrohaAdapter<T> {
    pub fn new(transport: Arc<T>, settings: IrohaSettings) -> Self {
        Self {
            transport,
            settings,
            last_created_time: AtomicI64::new(0),
        }
    }

    pub fn settings(&self) -> &IrohaSettings {
        &self.settings
    }

    /// Ledger account id for a platform display name.
    pub fn account_id(&self, display_name: &str) -> Result<LocalAccountId, AdapterError> {
        let id = format!("{display_name}@{}", self.settings.domain);
        if !is_valid_account_id(&id) {
            return Err(AdapterError::Invalid(format!("invalid account id format: {id}")));
        }
        LocalAccountId::new(id).map_err(|e| AdapterError::Invalid(e.to_string()))
    }

    /// Creation times are strictly increasing so identical payloads never
    /// share a hash.
    fn next_created_time(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_created_time.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_created_time.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    fn format_amount(&self, amount: Amount) -> Result<String, AdapterError> {
        let precision = self.settings.precision;
        let units = amount
            .to_base_units(precision)
            .map_err(|e| AdapterError::Invalid(e.to_string()))?;
        let factor = 10i64.pow(precision);
        Ok(format!(
            "{}.{:0width$}",
            units / factor,
            units % factor,
            width = precision as usize
        ))
    }

    fn parse_amount(&self, text: &str) -> Result<Amount, AdapterError> {
        let precision = self.settings.precision as usize;
        let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
        if frac.len() > precision {
            return Err(AdapterError::Aborted(format!("ledger returned malformed amount {text}")));
        }
        let padded = format!("{whole}{frac:0<precision$}");
        let units: i64 = padded
            .parse()
            .map_err(|_| AdapterError::Aborted(format!("ledger returned malformed amount {text}")))?;
        Amount::from_base_units(units, self.settings.precision)
            .map_err(|e| AdapterError::Aborted(e.to_string()))
    }

    /// Submit and settle a transaction.
    ///
    /// If the submission itself fails after possibly reaching the peer, the
    /// peer is asked for the transaction's status before giving up. Only an
    /// unreachable peer proves nothing was sent; a peer that does not know
    /// the hash yet may still queue and commit it, so that is indeterminate.
    async fn submit(&self, tx: &IrohaTransaction) -> Result<(String, Outcome), AdapterError> {
        let hash = tx.hash().map_err(|e| AdapterError::Invalid(e.to_string()))?;
        match self.transport.send_tx(tx).await {
            Ok(statuses) => Ok((hash, final_outcome(&statuses))),
            Err(TransportError::Unreachable(msg)) => Err(AdapterError::Unavailable(msg)),
            Err(send_err) => match self.transport.tx_status(&hash).await {
                Ok(Some(status)) => Ok((hash, final_outcome(&[status]))),
                Ok(None) => Err(AdapterError::Indeterminate(format!(
                    "tx {hash}: {send_err}; peer does not know the tx yet"
                ))),
                Err(query_err) => Err(AdapterError::Indeterminate(format!(
                    "tx {hash}: {send_err}; status query failed: {query_err}"
                ))),
            },
        }
    }

    /// Create the asset if it does not exist yet.
    async fn ensure_asset(&self, asset: &AssetRef) -> Result<(), AdapterError> {
        let (asset_name, domain_id) = asset
            .as_str()
            .split_once('#')
            .ok_or_else(|| AdapterError::Invalid(format!("asset id must be name#domain: {asset}")))?;

        let existing = self
            .transport
            .get_asset_info(asset.as_str())
            .await
            .map_err(before_submission)?;
        if existing.is_some() {
            return Ok(());
        }

        let tx = IrohaTransaction::new(
            self.settings.admin_account.clone(),
            self.next_created_time(),
            vec![IrohaCommand::CreateAsset {
                asset_name: asset_name.to_string(),
                domain_id: domain_id.to_string(),
                precision: self.settings.precision,
            }],
        );
        match self.submit(&tx).await? {
            (_, Outcome::Committed) => {
                debug!(asset = %asset, "created asset");
                Ok(())
            }
            (_, Outcome::StatefulRejected { error_code: error_code::ALREADY_EXISTS, .. }) => Ok(()),
            (_, Outcome::Unsettled(status)) => Err(AdapterError::Unavailable(format!(
                "asset creation did not settle: {status}"
            ))),
            (_, other) => Err(AdapterError::Aborted(format!("asset creation failed: {other:?}"))),
        }
    }

    fn receipt(hash: String, created_time: i64) -> Result<LedgerReceipt, AdapterError> {
        let local_tx_id = LocalTxId::new(hash).map_err(|e| AdapterError::Aborted(e.to_string()))?;
        let timestamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(created_time)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(LedgerReceipt {
            local_tx_id,
            timestamp,
        })
    }
}

/// `[a-z0-9]+@[a-z0-9]+`
fn is_valid_account_id(id: &str) -> bool {
    let part_ok = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    match id.split_once('@') {
        Some((name, domain)) => part_ok(name) && part_ok(domain),
        None => false,
    }
}

#[async_trait]
impl<T: IrohaTransport + 'static> LedgerAdapter for IrohaAdapter<T> {
    fn kind(&self) -> LedgerKind {
        LedgerKind::AccountBased
    }

    fn default_asset(&self) -> AssetRef {
        self.settings.asset_id()
    }

    #[instrument(skip(self), err)]
    async fn create_account(&self, display_name: &str) -> Result<ProvisionedAccount, AdapterError> {
        let account_id = self.account_id(display_name)?;

        let existing = self
            .transport
            .get_account(account_id.as_str())
            .await
            .map_err(before_submission)?;
        if existing.is_some() {
            return Err(AdapterError::AlreadyExists {
                local_account_id: account_id,
            });
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        let private_key = hex::encode(signing_key.to_bytes());

        let tx = IrohaTransaction::new(
            self.settings.admin_account.clone(),
            self.next_created_time(),
            vec![IrohaCommand::CreateAccount {
                account_name: display_name.to_string(),
                domain_id: self.settings.domain.clone(),
                public_key: public_key.clone(),
            }],
        );

        match self.submit(&tx).await? {
            (_, Outcome::Committed) => Ok(ProvisionedAccount {
                local_account_id: account_id,
                credentials: Credentials {
                    public_key: Some(public_key),
                    private_key: Some(private_key),
                    address: None,
                },
            }),
            (_, Outcome::StatefulRejected { error_code: error_code::ALREADY_EXISTS, .. }) => {
                Err(AdapterError::AlreadyExists {
                    local_account_id: account_id,
                })
            }
            (_, Outcome::StatelessRejected) => Err(AdapterError::Aborted(
                "account creation failed stateless validation".to_string(),
            )),
            (hash, Outcome::StatefulRejected { error_code, .. }) => Err(AdapterError::Aborted(format!(
                "account creation tx {hash} rejected with code {error_code}"
            ))),
            (hash, Outcome::Unsettled(status)) => Err(AdapterError::Indeterminate(format!(
                "account creation tx {hash}: {status}"
            ))),
        }
    }

    #[instrument(skip(self), fields(dest = %dest, amount = %amount), err)]
    async fn mint(
        &self,
        dest: &LocalAccountId,
        amount: Amount,
        asset: &AssetRef,
    ) -> Result<LedgerReceipt, AdapterError> {
        let quantity = self.format_amount(amount)?;
        self.ensure_asset(asset).await?;

        let dest_account = self
            .transport
            .get_account(dest.as_str())
            .await
            .map_err(before_submission)?;
        if dest_account.is_none() {
            return Err(AdapterError::Aborted(format!(
                "destination account {dest} does not exist"
            )));
        }

        let created_time = self.next_created_time();
        let tx = IrohaTransaction::new(
            self.settings.admin_account.clone(),
            created_time,
            vec![
                IrohaCommand::AddAssetQuantity {
                    asset_id: asset.as_str().to_string(),
                    amount: quantity.clone(),
                },
                IrohaCommand::TransferAsset {
                    src_account_id: self.settings.admin_account.clone(),
                    dest_account_id: dest.as_str().to_string(),
                    asset_id: asset.as_str().to_string(),
                    description: "Minting of asset to account".to_string(),
                    amount: quantity,
                },
            ],
        );

        match self.submit(&tx).await? {
            (hash, Outcome::Committed) => Self::receipt(hash, created_time),
            (_, Outcome::StatefulRejected { command_index: 0, error_code: error_code::SUPPLY_OVERFLOW }) => {
                Err(AdapterError::InsufficientSupply(format!(
                    "adding {amount} would exceed the supply cap of {asset}"
                )))
            }
            (hash, Outcome::StatefulRejected { command_index, error_code }) => {
                warn!(tx = %hash, command_index, error_code, "mint rejected");
                Err(AdapterError::Aborted(format!(
                    "mint tx {hash} rejected at command {command_index} with code {error_code}"
                )))
            }
            (hash, Outcome::StatelessRejected) => Err(AdapterError::Aborted(format!(
                "mint tx {hash} failed stateless validation"
            ))),
            (hash, Outcome::Unsettled(status)) => Err(AdapterError::Indeterminate(format!(
                "mint tx {hash}: {status}"
            ))),
        }
    }

    #[instrument(skip(self, memo), fields(from = %from, to = %to, amount = %amount), err)]
    async fn transfer(
        &self,
        from: &LocalAccountId,
        to: &LocalAccountId,
        amount: Amount,
        memo: &str,
    ) -> Result<LedgerReceipt, AdapterError> {
        let quantity = self.format_amount(amount)?;
        let asset = self.settings.asset_id();
        let created_time = self.next_created_time();
        let tx = IrohaTransaction::new(
            from.as_str().to_string(),
            created_time,
            vec![IrohaCommand::TransferAsset {
                src_account_id: from.as_str().to_string(),
                dest_account_id: to.as_str().to_string(),
                asset_id: asset.as_str().to_string(),
                description: memo.to_string(),
                amount: quantity,
            }],
        );

        match self.submit(&tx).await? {
            (hash, Outcome::Committed) => Self::receipt(hash, created_time),
            (_, Outcome::StatefulRejected { error_code: error_code::NOT_ENOUGH_BALANCE, .. }) => {
                Err(AdapterError::InsufficientFunds(format!("{from} cannot cover {amount}")))
            }
            (hash, Outcome::StatefulRejected { error_code, .. }) => Err(AdapterError::Aborted(format!(
                "transfer tx {hash} rejected with code {error_code}"
            ))),
            (hash, Outcome::StatelessRejected) => Err(AdapterError::Aborted(format!(
                "transfer tx {hash} failed stateless validation"
            ))),
            (hash, Outcome::Unsettled(status)) => Err(AdapterError::Indeterminate(format!(
                "transfer tx {hash}: {status}"
            ))),
        }
    }

    async fn query_balance(&self, account: &LocalAccountId) -> Result<Amount, AdapterError> {
        let found = self
            .transport
            .get_account(account.as_str())
            .await
            .map_err(before_submission)?;
        if found.is_none() {
            return Err(AdapterError::NotFound(account.to_string()));
        }
        let asset = self.settings.asset_id();
        match self
            .transport
            .get_account_asset(account.as_str(), asset.as_str())
            .await
            .map_err(before_submission)?
        {
            Some(text) => self.parse_amount(&text),
            None => Ok(Amount::ZERO),
        }
    }
}
