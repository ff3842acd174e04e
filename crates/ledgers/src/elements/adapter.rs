use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use mtp_core::{Amount, Credentials, LocalAccountId, LocalTxId, UtxoAddress, validate_name};

use super::rpc::{ElementsRpc, error_code};
use super::{ElementsSettings, NATIVE_DECIMALS};
use crate::adapter::{
    AdapterError, AssetRef, LedgerAdapter, LedgerKind, LedgerReceipt, ProvisionedAccount,
    TransportError, before_submission,
};

/// Adapter for a confidential-asset UTXO ledger driven through wallet RPC.
///
/// Each platform account is a node wallet; funds always move to a fresh
/// receiving address of the destination wallet.
pub struct ElementsAdapter<R> {
    rpc: Arc<R>,
    settings: ElementsSettings,
}

fn to_sats(amount: Amount) -> Result<i64, AdapterError> {
    amount
        .to_base_units(NATIVE_DECIMALS)
        .map_err(|e| AdapterError::Invalid(e.to_string()))
}

/// Map a failed `send_to_address`; the send may have been broadcast unless
/// the node answered or was never reached.
fn send_failed(err: TransportError) -> AdapterError {
    match err {
        TransportError::Rpc { code, message } if code == error_code::WALLET_INSUFFICIENT_FUNDS => {
            AdapterError::InsufficientFunds(message)
        }
        TransportError::Rpc { code, message } => AdapterError::Aborted(format!("rpc {code}: {message}")),
        TransportError::Unreachable(msg) => AdapterError::Unavailable(msg),
        other => AdapterError::Indeterminate(other.to_string()),
    }
}

impl<R: ElementsRpc> ElementsAdapter<R> {
    pub fn new(rpc: Arc<R>, settings: ElementsSettings) -> Self {
        Self { rpc, settings }
    }

    pub fn settings(&self) -> &ElementsSettings {
        &self.settings
    }

    async fn wallet_exists(&self, wallet: &str) -> Result<bool, AdapterError> {
        let wallets = self.rpc.list_wallets().await.map_err(before_submission)?;
        Ok(wallets.iter().any(|w| w == wallet))
    }

    /// Receiving address material of a freshly created wallet.
    async fn first_address(&self, wallet: &str) -> Result<UtxoAddress, TransportError> {
        let address = self.rpc.get_new_address(wallet).await?;
        let info = self.rpc.get_address_info(wallet, &address).await?;
        let private_key = self.rpc.dump_priv_key(wallet, &info.unconfidential).await?;
        Ok(UtxoAddress {
            ct_address: address,
            confidential_key: info.confidential_key,
            non_ct_address: info.unconfidential,
            private_key,
        })
    }

    /// Make sure the base wallet can cover `needed` sats, reissuing if not.
    async fn ensure_supply(&self, needed: i64) -> Result<(), AdapterError> {
        let base = &self.settings.base_wallet;
        let held = self
            .rpc
            .get_balance(base, &self.settings.asset_label)
            .await
            .map_err(before_submission)?;
        if held >= needed {
            return Ok(());
        }

        let headroom = Amount::from_major(self.settings.reissue_headroom as i64)
            .and_then(|h| h.to_base_units(NATIVE_DECIMALS))
            .map_err(|e| AdapterError::Invalid(e.to_string()))?;
        let reissue = (needed - held)
            .checked_add(headroom)
            .ok_or_else(|| AdapterError::Invalid("reissue amount overflow".to_string()))?;

        match self
            .rpc
            .reissue_asset(base, &self.settings.asset_label, reissue)
            .await
        {
            Ok(txid) => {
                debug!(%txid, sats = reissue, "reissued asset");
                Ok(())
            }
            Err(TransportError::Rpc { code, message }) if code == error_code::INVALID_PARAMETER => {
                Err(AdapterError::InsufficientSupply(message))
            }
            Err(TransportError::Rpc { code, message }) => {
                Err(AdapterError::Aborted(format!("reissue rpc {code}: {message}")))
            }
            // Extra base supply is not an account-visible effect.
            Err(other) => Err(AdapterError::Unavailable(format!("reissue failed: {other}"))),
        }
    }

    async fn send(
        &self,
        from_wallet: &str,
        to_wallet: &str,
        sats: i64,
        comment: &str,
    ) -> Result<LedgerReceipt, AdapterError> {
        let address = self
            .rpc
            .get_new_address(to_wallet)
            .await
            .map_err(before_submission)?;
        let txid = self
            .rpc
            .send_to_address(from_wallet, &address, sats, &self.settings.asset_label, comment)
            .await
            .map_err(send_failed)?;
        let local_tx_id = LocalTxId::new(txid).map_err(|e| AdapterError::Indeterminate(e.to_string()))?;
        Ok(LedgerReceipt {
            local_tx_id,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl<R: ElementsRpc + 'static> LedgerAdapter for ElementsAdapter<R> {
    fn kind(&self) -> LedgerKind {
        LedgerKind::Utxo
    }

    fn default_asset(&self) -> AssetRef {
        AssetRef::new(self.settings.asset_label.clone())
    }

    #[instrument(skip(self), err)]
    async fn create_account(&self, display_name: &str) -> Result<ProvisionedAccount, AdapterError> {
        validate_name(display_name).map_err(|e| AdapterError::Invalid(e.to_string()))?;
        let wallet = self.settings.wallet_name(display_name);
        let local_account_id =
            LocalAccountId::new(wallet.clone()).map_err(|e| AdapterError::Invalid(e.to_string()))?;

        if self.wallet_exists(&wallet).await? {
            return Err(AdapterError::AlreadyExists { local_account_id });
        }
        match self.rpc.create_wallet(&wallet).await {
            Ok(()) => {}
            Err(TransportError::Rpc { code, .. }) if code == error_code::WALLET_ERROR => {
                return Err(AdapterError::AlreadyExists { local_account_id });
            }
            Err(err) => return Err(before_submission(err)),
        }

        // The wallet exists from here on; address material is best effort.
        let credentials = match self.first_address(&wallet).await {
            Ok(address) => Credentials {
                address: Some(address),
                ..Credentials::default()
            },
            Err(err) => {
                warn!(%wallet, error = %err, "wallet created without receiving address");
                Credentials::empty()
            }
        };
        Ok(ProvisionedAccount {
            local_account_id,
            credentials,
        })
    }

    #[instrument(skip(self), fields(dest = %dest, amount = %amount), err)]
    async fn mint(
        &self,
        dest: &LocalAccountId,
        amount: Amount,
        asset: &AssetRef,
    ) -> Result<LedgerReceipt, AdapterError> {
        if asset.as_str() != self.settings.asset_label {
            return Err(AdapterError::Invalid(format!("unsupported asset {asset}")));
        }
        let sats = to_sats(amount)?;
        if !self.wallet_exists(dest.as_str()).await? {
            return Err(AdapterError::Aborted(format!("destination wallet {dest} does not exist")));
        }
        self.ensure_supply(sats).await?;
        let base = self.settings.base_wallet.clone();
        self.send(&base, dest.as_str(), sats, "mint").await
    }

    #[instrument(skip(self, memo), fields(from = %from, to = %to, amount = %amount), err)]
    async fn transfer(
        &self,
        from: &LocalAccountId,
        to: &LocalAccountId,
        amount: Amount,
        memo: &str,
    ) -> Result<LedgerReceipt, AdapterError> {
        let sats = to_sats(amount)?;
        let held = self
            .rpc
            .get_balance(from.as_str(), &self.settings.asset_label)
            .await
            .map_err(|err| match err {
                TransportError::Rpc { code, .. } if code == error_code::WALLET_NOT_FOUND => {
                    AdapterError::Aborted(format!("source wallet {from} does not exist"))
                }
                other => before_submission(other),
            })?;
        if held < sats {
            return Err(AdapterError::InsufficientFunds(format!("{from} cannot cover {amount}")));
        }
        if !self.wallet_exists(to.as_str()).await? {
            return Err(AdapterError::Aborted(format!("destination wallet {to} does not exist")));
        }
        self.send(from.as_str(), to.as_str(), sats, memo).await
    }

    async fn query_balance(&self, account: &LocalAccountId) -> Result<Amount, AdapterError> {
        match self.rpc.get_balance(account.as_str(), &self.settings.asset_label).await {
            Ok(sats) => Amount::from_base_units(sats, NATIVE_DECIMALS)
                .map_err(|e| AdapterError::Aborted(e.to_string())),
            Err(TransportError::Rpc { code, .. }) if code == error_code::WALLET_NOT_FOUND => {
                Err(AdapterError::NotFound(account.to_string()))
            }
            Err(err) => Err(before_submission(err)),
        }
    }
}
