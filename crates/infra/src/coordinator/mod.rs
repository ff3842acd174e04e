//! Multi-ledger coordination (application-level orchestration).
//!
//! The coordinator drives account creation, mints and transfers against the
//! ledger adapters and mirrors their effects into the bookkeeping store.
//!
//! ## Ordering rule
//!
//! ```text
//! Request
//!   ↓
//! 1. Resolve bindings (local, no side effects)
//!   ↓
//! 2. Pre-flight checks (advisory booked balance)
//!   ↓
//! 3. Reserve GlobalTxID (persisted counter)
//!   ↓
//! 4. Ledger adapter call (authoritative, never retried)     PENDING → LEDGER_COMMITTED
//!   ↓
//! 5. Book transaction + balances under that id               → BOOKED
//!        └─ on failure: park in the out-of-sync log          → OUT_OF_SYNC
//! ```
//!
//! The ledger always moves first; the bookkeeping store is a derived record
//! of its effects. Step 5 runs on its own task so a caller that goes away
//! after step 4 cannot abandon a committed ledger effect. An out-of-sync
//! error carries the whole booking, so it can be replayed even when the
//! out-of-sync log could not be written.
//!
//! Adapter calls run under `coordinator.adapter_timeout_ms` and without any
//! account scope held.

mod accounts;
mod booking;
mod error;
mod value;

use std::future::Future;
use std::sync::Arc;

use mtp_core::{Amount, GlobalId, LedgerId, LocalAccountId};
use mtp_ledgers::{AdapterError, AdapterRegistry, RegisteredLedger};

use crate::bookkeeping::BookkeepingStore;
use crate::config::CoordinatorConfig;
use crate::identity::IdentityRegistry;
use crate::locks::AccountLocks;
use crate::reconcile::{OutOfSyncLog, ReconciliationReporter};

pub use accounts::{AccountCreation, LedgerAccountStatus};
pub(crate) use booking::Booker;
pub use error::{CoordinatorError, LedgerEffect};
pub use value::BookedTransaction;

pub struct Coordinator<S> {
    store: Arc<S>,
    identities: IdentityRegistry<S>,
    adapters: Arc<AdapterRegistry>,
    booker: Booker<S>,
    config: CoordinatorConfig,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            identities: self.identities.clone(),
            adapters: Arc::clone(&self.adapters),
            booker: self.booker.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: BookkeepingStore + 'static> Coordinator<S> {
    /// Build a coordinator over `store`.
    ///
    /// Ids still held by bookings parked in `journal` are reserved in the
    /// store's `GlobalTxID` counter before anything else runs.
    pub async fn new(
        store: Arc<S>,
        adapters: Arc<AdapterRegistry>,
        journal: Arc<dyn OutOfSyncLog>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        let parked = journal.pending().await?;
        if let Some(last) = parked.iter().map(|p| p.booking.global_tx_id).max() {
            store.reserve_global_tx_ids_through(last).await?;
        }
        let locks = Arc::new(AccountLocks::new());
        Ok(Self {
            identities: IdentityRegistry::new(Arc::clone(&store)),
            booker: Booker::new(Arc::clone(&store), locks, journal),
            store,
            adapters,
            config,
        })
    }

    pub fn identities(&self) -> &IdentityRegistry<S> {
        &self.identities
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reporter sharing this coordinator's account scopes and out-of-sync log.
    pub fn reporter(&self) -> ReconciliationReporter<S> {
        ReconciliationReporter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.adapters),
            self.booker.clone(),
        )
    }

    /// Booked balance of `global_id` on `ledger_id`.
    pub async fn balance(&self, global_id: GlobalId, ledger_id: LedgerId) -> Result<Amount, CoordinatorError> {
        Ok(self.store.balance(global_id, ledger_id).await?)
    }

    fn ledger(&self, ledger_id: LedgerId) -> Result<&RegisteredLedger, CoordinatorError> {
        self.adapters
            .get(ledger_id)
            .ok_or(CoordinatorError::UnknownLedger(ledger_id))
    }

    async fn require_binding(&self, global_id: GlobalId, ledger_id: LedgerId) -> Result<LocalAccountId, CoordinatorError> {
        self.identities
            .resolve_binding(global_id, ledger_id)
            .await?
            .ok_or(CoordinatorError::UnboundAccount { global_id, ledger_id })
    }

    /// Run one adapter call under the configured timeout.
    ///
    /// An expired timeout is indeterminate: the call may have reached the
    /// ledger.
    async fn call_adapter<T>(
        &self,
        ledger_id: LedgerId,
        call: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, CoordinatorError> {
        let timeout = self.config.adapter_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CoordinatorError::from_adapter(ledger_id, err)),
            Err(_) => Err(CoordinatorError::LedgerOutcomeUnknown {
                ledger_id,
                reason: format!("adapter call exceeded {timeout:?}"),
            }),
        }
    }
}
