//! CreateAccount: one identity, one account per requested ledger.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, instrument, warn};

use mtp_core::{Credentials, GlobalId, LedgerId, LocalAccountId};
use mtp_ledgers::{AdapterError, ProvisionedAccount};

use super::{Coordinator, CoordinatorError};
use crate::bookkeeping::BookkeepingStore;
use crate::identity::RegistryError;

/// Per-ledger result of [`Coordinator::create_account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LedgerAccountStatus {
    /// The identity is bound to this local account.
    Bound(LocalAccountId),
    /// The ledger could not be reached, or did not answer in time. Safe to
    /// retry: the adapter looks for an existing account first.
    Pending(String),
    /// The binding would clash with an existing one.
    Conflict(String),
    /// The ledger refused to provision the account.
    Rejected(String),
}

impl LedgerAccountStatus {
    pub fn local_account_id(&self) -> Option<&LocalAccountId> {
        match self {
            LedgerAccountStatus::Bound(local) => Some(local),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, LedgerAccountStatus::Bound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountCreation {
    pub global_id: GlobalId,
    pub ledgers: BTreeMap<LedgerId, LedgerAccountStatus>,
}

impl AccountCreation {
    pub fn status(&self, ledger_id: LedgerId) -> Option<&LedgerAccountStatus> {
        self.ledgers.get(&ledger_id)
    }

    /// Ledgers that still need a retry.
    pub fn pending(&self) -> Vec<LedgerId> {
        self.ledgers
            .iter()
            .filter(|(_, status)| matches!(status, LedgerAccountStatus::Pending(_)))
            .map(|(ledger_id, _)| *ledger_id)
            .collect()
    }

    pub fn all_bound(&self) -> bool {
        self.ledgers.values().all(LedgerAccountStatus::is_bound)
    }
}

impl<S: BookkeepingStore + 'static> Coordinator<S> {
    /// Create (or extend) the identity `name` with one account on each ledger
    /// in `ledger_ids`.
    ///
    /// Ledgers are handled independently: a failure on one never undoes a
    /// binding made on another. Repeating the call is idempotent.
    #[instrument(skip(self), fields(global_id = tracing::field::Empty), err)]
    pub async fn create_account(
        &self,
        name: &str,
        ledger_ids: &[LedgerId],
    ) -> Result<AccountCreation, CoordinatorError> {
        let mut requested: Vec<LedgerId> = ledger_ids.to_vec();
        requested.sort();
        requested.dedup();
        if requested.is_empty() {
            return Err(CoordinatorError::Validation("at least one ledger is required".to_string()));
        }
        for ledger_id in &requested {
            self.ledger(*ledger_id)?;
        }

        let global_id = self.identities.ensure_identity(name).await?;
        tracing::Span::current().record("global_id", global_id.get());

        let mut ledgers = BTreeMap::new();
        for ledger_id in requested {
            let status = self.provision(global_id, name, ledger_id).await?;
            ledgers.insert(ledger_id, status);
        }

        Ok(AccountCreation { global_id, ledgers })
    }

    /// [`Self::create_account`] on every registered ledger.
    pub async fn create_account_everywhere(&self, name: &str) -> Result<AccountCreation, CoordinatorError> {
        let ledger_ids = self.adapters.ledger_ids();
        self.create_account(name, &ledger_ids).await
    }

    async fn provision(
        &self,
        global_id: GlobalId,
        name: &str,
        ledger_id: LedgerId,
    ) -> Result<LedgerAccountStatus, CoordinatorError> {
        if let Some(local) = self.identities.resolve_binding(global_id, ledger_id).await? {
            return Ok(LedgerAccountStatus::Bound(local));
        }

        let ledger = self.ledger(ledger_id)?;
        let timeout = self.config.adapter_timeout();
        let provisioned = match tokio::time::timeout(timeout, ledger.adapter.create_account(name)).await {
            Ok(Ok(account)) => account,
            Ok(Err(AdapterError::AlreadyExists { local_account_id })) => {
                info!(%ledger_id, local = %local_account_id, "ledger account already exists; adopting it");
                ProvisionedAccount {
                    local_account_id,
                    credentials: Credentials::empty(),
                }
            }
            Ok(Err(err @ (AdapterError::Unavailable(_) | AdapterError::Indeterminate(_)))) => {
                warn!(%ledger_id, error = %err, "ledger account left pending");
                return Ok(LedgerAccountStatus::Pending(err.to_string()));
            }
            Ok(Err(err)) => {
                warn!(%ledger_id, error = %err, "ledger refused account");
                return Ok(LedgerAccountStatus::Rejected(err.to_string()));
            }
            Err(_) => {
                warn!(%ledger_id, "account creation timed out; ledger account left pending");
                return Ok(LedgerAccountStatus::Pending(format!("adapter call exceeded {timeout:?}")));
            }
        };

        let local = provisioned.local_account_id.clone();
        match self
            .identities
            .bind_ledger_account(global_id, ledger_id, provisioned.local_account_id, provisioned.credentials)
            .await
        {
            Ok(()) => Ok(LedgerAccountStatus::Bound(local)),
            Err(err @ (RegistryError::AlreadyBound { .. } | RegistryError::LocalAccountClaimed { .. })) => {
                warn!(%ledger_id, error = %err, "binding conflict");
                Ok(LedgerAccountStatus::Conflict(err.to_string()))
            }
            Err(other) => Err(other.into()),
        }
    }
}
