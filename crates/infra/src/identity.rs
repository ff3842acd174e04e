//! Identity Registry: platform identities and their per-ledger bindings.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use mtp_core::{Credentials, GlobalId, LedgerBinding, LedgerId, LocalAccountId, validate_name};

use crate::bookkeeping::{BookkeepingStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The pair is bound to a different local account already.
    #[error("identity {global_id} is already bound on ledger {ledger_id} to {existing} (requested {requested})")]
    AlreadyBound {
        global_id: GlobalId,
        ledger_id: LedgerId,
        existing: LocalAccountId,
        requested: LocalAccountId,
    },

    /// The local account belongs to another identity.
    #[error("local account {local_account_id} on ledger {ledger_id} is bound to identity {owner}")]
    LocalAccountClaimed {
        ledger_id: LedgerId,
        local_account_id: LocalAccountId,
        owner: GlobalId,
    },

    #[error("unknown identity {0}")]
    UnknownIdentity(GlobalId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maps a platform-wide identity to zero or more ledger bindings.
///
/// Writes go through the store's uniqueness constraints, so concurrent
/// callers converge on one identity per name and one binding per
/// `(GlobalID, LedgerID)` without an in-process lock.
pub struct IdentityRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for IdentityRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: BookkeepingStore> IdentityRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Existing `GlobalID` for `name`, or a newly allocated one.
    #[instrument(skip(self), err)]
    pub async fn ensure_identity(&self, name: &str) -> Result<GlobalId, RegistryError> {
        validate_name(name).map_err(|e| RegistryError::InvalidName(e.to_string()))?;

        if let Some(existing) = self.store.find_identity_by_name(name).await? {
            debug!(global_id = %existing.global_id, "identity already registered");
            return Ok(existing.global_id);
        }

        match self.store.create_identity(name).await {
            Ok(identity) => {
                info!(global_id = %identity.global_id, "identity created");
                Ok(identity.global_id)
            }
            Err(StoreError::UniqueViolation(_)) => {
                // Lost the race to a concurrent caller for the same name.
                let winner = self.store.find_identity_by_name(name).await?.ok_or_else(|| {
                    StoreError::Database(format!("identity '{name}' vanished after unique violation"))
                })?;
                warn!(global_id = %winner.global_id, "duplicate identity request resolved to existing id");
                Ok(winner.global_id)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Record that `global_id` owns `local_account_id` on `ledger_id`.
    ///
    /// Re-binding the same local account is a no-op (stored credentials are
    /// kept). A different local account for the same pair, or a local
    /// account owned by someone else, is rejected.
    #[instrument(skip(self, credentials), fields(global_id = %global_id, ledger_id = %ledger_id, local = %local_account_id), err)]
    pub async fn bind_ledger_account(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
        local_account_id: LocalAccountId,
        credentials: Credentials,
    ) -> Result<(), RegistryError> {
        if self.store.find_identity(global_id).await?.is_none() {
            return Err(RegistryError::UnknownIdentity(global_id));
        }

        if self.check_binding(global_id, ledger_id, &local_account_id).await? {
            return Ok(());
        }

        let binding = LedgerBinding {
            global_id,
            ledger_id,
            local_account_id,
            credentials,
        };
        match self.store.insert_binding(&binding).await {
            Ok(()) => {
                info!("ledger account bound");
                Ok(())
            }
            Err(StoreError::UniqueViolation(_)) => {
                // A concurrent bind landed first; report what it bound.
                if self.check_binding(global_id, ledger_id, &binding.local_account_id).await? {
                    return Ok(());
                }
                Err(StoreError::Database("binding rejected without a conflicting row".to_string()).into())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// `Ok(true)` when the exact binding already exists, `Ok(false)` when the
    /// pair and the local account are both free.
    async fn check_binding(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
        local_account_id: &LocalAccountId,
    ) -> Result<bool, RegistryError> {
        if let Some(existing) = self.store.find_binding(global_id, ledger_id).await? {
            if &existing.local_account_id == local_account_id {
                return Ok(true);
            }
            return Err(RegistryError::AlreadyBound {
                global_id,
                ledger_id,
                existing: existing.local_account_id,
                requested: local_account_id.clone(),
            });
        }
        if let Some(owner) = self.store.find_binding_by_local(ledger_id, local_account_id).await? {
            return Err(RegistryError::LocalAccountClaimed {
                ledger_id,
                local_account_id: local_account_id.clone(),
                owner: owner.global_id,
            });
        }
        Ok(false)
    }

    pub async fn resolve_binding(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
    ) -> Result<Option<LocalAccountId>, RegistryError> {
        Ok(self
            .store
            .find_binding(global_id, ledger_id)
            .await?
            .map(|b| b.local_account_id))
    }

    /// Reverse lookup of the identity owning a local account.
    pub async fn resolve_global_id(
        &self,
        ledger_id: LedgerId,
        local_account_id: &LocalAccountId,
    ) -> Result<Option<GlobalId>, RegistryError> {
        Ok(self
            .store
            .find_binding_by_local(ledger_id, local_account_id)
            .await?
            .map(|b| b.global_id))
    }

    /// Full binding including credentials.
    pub async fn binding(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
    ) -> Result<Option<LedgerBinding>, RegistryError> {
        Ok(self.store.find_binding(global_id, ledger_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookkeeping::SqliteStore;

    async fn registry() -> IdentityRegistry<SqliteStore> {
        IdentityRegistry::new(Arc::new(SqliteStore::in_memory().await.unwrap()))
    }

    fn local(s: &str) -> LocalAccountId {
        LocalAccountId::new(s).unwrap()
    }

    #[tokio::test]
    async fn ensure_identity_is_idempotent() {
        let registry = registry().await;
        let first = registry.ensure_identity("alice").await.unwrap();
        let again = registry.ensure_identity("alice").await.unwrap();
        let bob = registry.ensure_identity("bob").await.unwrap();
        assert_eq!(first, GlobalId::new(1));
        assert_eq!(again, first);
        assert_eq!(bob, GlobalId::new(2));
        assert!(matches!(
            registry.ensure_identity("Not Valid").await.unwrap_err(),
            RegistryError::InvalidName(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_ensure_identity_yields_one_id() {
        let registry = registry().await;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.ensure_identity("carol").await }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids, vec![GlobalId::new(1)]);
    }

    #[tokio::test]
    async fn rebinding_to_a_different_account_is_rejected() {
        let registry = registry().await;
        let alice = registry.ensure_identity("alice").await.unwrap();
        let ledger = LedgerId::new(2);

        registry
            .bind_ledger_account(alice, ledger, local("accta"), Credentials::empty())
            .await
            .unwrap();
        registry
            .bind_ledger_account(alice, ledger, local("accta"), Credentials::empty())
            .await
            .unwrap();

        let err = registry
            .bind_ledger_account(alice, ledger, local("acctb"), Credentials::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyBound { .. }));
        assert_eq!(
            registry.resolve_binding(alice, ledger).await.unwrap(),
            Some(local("accta"))
        );
    }

    #[tokio::test]
    async fn local_account_cannot_serve_two_identities() {
        let registry = registry().await;
        let alice = registry.ensure_identity("alice").await.unwrap();
        let bob = registry.ensure_identity("bob").await.unwrap();
        let ledger = LedgerId::new(1);

        registry
            .bind_ledger_account(alice, ledger, local("shared"), Credentials::empty())
            .await
            .unwrap();
        let err = registry
            .bind_ledger_account(bob, ledger, local("shared"), Credentials::empty())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::LocalAccountClaimed {
                ledger_id: ledger,
                local_account_id: local("shared"),
                owner: alice,
            }
        );
        assert_eq!(
            registry.resolve_global_id(ledger, &local("shared")).await.unwrap(),
            Some(alice)
        );
        assert_eq!(registry.resolve_binding(bob, ledger).await.unwrap(), None);
    }

    #[tokio::test]
    async fn binding_requires_a_known_identity() {
        let registry = registry().await;
        let err = registry
            .bind_ledger_account(GlobalId::new(42), LedgerId::new(1), local("x"), Credentials::empty())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownIdentity(GlobalId::new(42)));
    }
}
