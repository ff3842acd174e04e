//! Reconciliation: find ledger effects the bookkeeping store is missing,
//! replay them, and check that booked balances still agree with the
//! transactions behind them and with the ledgers themselves.
//!
//! Replay reuses the parked booking verbatim, including its `GlobalTxID`,
//! so a replayed transaction is indistinguishable from one booked on the
//! first try. A booking that never reached the log can still be replayed
//! from the out-of-sync error that carried it.

mod journal;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use mtp_core::{Amount, Booking, GlobalId, LedgerId, LocalAccountId, LocalTxId};
use mtp_ledgers::AdapterRegistry;

use crate::bookkeeping::{BookingOutcome, BookkeepingStore, StoreError};
use crate::coordinator::Booker;

pub use journal::{FileOutOfSyncLog, InMemoryOutOfSyncLog, JournalError, OutOfSyncLog, ParkedBooking};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("no parked booking for ledger tx {local_tx_id} on ledger {ledger_id}")]
    NotParked { ledger_id: LedgerId, local_tx_id: LocalTxId },

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stored balance that disagrees with the sum of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub global_id: GlobalId,
    pub ledger_id: LedgerId,
    pub stored: Amount,
    pub derived: Amount,
}

/// Booked balance that disagrees with the ledger's own view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDivergence {
    pub global_id: GlobalId,
    pub ledger_id: LedgerId,
    pub local_account_id: LocalAccountId,
    pub booked: Amount,
    pub on_ledger: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BalanceAudit {
    pub mismatches: Vec<BalanceMismatch>,
    /// Transaction participants with no binding, as `(ledger, local account)`.
    pub unresolved_accounts: Vec<(LedgerId, LocalAccountId)>,
}

impl BalanceAudit {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.unresolved_accounts.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub divergences: Vec<BalanceDivergence>,
    /// Bindings whose ledger could not be queried, with the reason.
    pub unreachable: Vec<(LedgerId, LocalAccountId, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub booked: usize,
    pub already_booked: usize,
    pub failed: Vec<(LedgerId, LocalTxId, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub out_of_sync: Vec<ParkedBooking>,
    pub balances: BalanceAudit,
    pub ledgers: LedgerAudit,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.out_of_sync.is_empty() && self.balances.is_clean() && self.ledgers.divergences.is_empty()
    }
}

pub struct ReconciliationReporter<S> {
    store: Arc<S>,
    adapters: Arc<AdapterRegistry>,
    booker: Booker<S>,
}

impl<S: BookkeepingStore + 'static> ReconciliationReporter<S> {
    pub(crate) fn new(store: Arc<S>, adapters: Arc<AdapterRegistry>, booker: Booker<S>) -> Self {
        Self {
            store,
            adapters,
            booker,
        }
    }

    /// Ledger-committed transactions with no `Transactions` row.
    ///
    /// Parked entries that turn out to be booked already (e.g. booked by a
    /// concurrent replay) are marked resolved on the way.
    #[instrument(skip(self), err)]
    pub async fn out_of_sync(&self) -> Result<Vec<ParkedBooking>, ReconcileError> {
        let journal = self.booker.journal();
        let mut missing = Vec::new();
        for entry in journal.pending().await? {
            let booking = &entry.booking;
            if self
                .store
                .find_transaction(booking.ledger_id, &booking.local_tx_id)
                .await?
                .is_some()
            {
                journal.resolve(booking.ledger_id, &booking.local_tx_id).await?;
                continue;
            }
            missing.push(entry);
        }
        Ok(missing)
    }

    /// Book one parked transaction and clear it from the out-of-sync log.
    #[instrument(skip(self), fields(ledger_id = %ledger_id, local_tx_id = %local_tx_id), err)]
    pub async fn replay(
        &self,
        ledger_id: LedgerId,
        local_tx_id: &LocalTxId,
    ) -> Result<BookingOutcome, ReconcileError> {
        let entry = self
            .booker
            .journal()
            .pending()
            .await?
            .into_iter()
            .find(|e| e.booking.ledger_id == ledger_id && &e.booking.local_tx_id == local_tx_id)
            .ok_or_else(|| ReconcileError::NotParked {
                ledger_id,
                local_tx_id: local_tx_id.clone(),
            })?;
        self.replay_booking(&entry.booking).await
    }

    /// Book a ledger-committed transaction, e.g. the one carried by an
    /// out-of-sync error whose log write failed.
    ///
    /// Deduplicated by `(LedgerID, LocalTxID)` like every booking. A log
    /// entry for the same ledger tx is resolved if the log is writable;
    /// otherwise `out_of_sync` clears it later.
    #[instrument(
        skip(self, booking),
        fields(ledger_id = %booking.ledger_id, local_tx_id = %booking.local_tx_id),
        err
    )]
    pub async fn replay_booking(&self, booking: &Booking) -> Result<BookingOutcome, ReconcileError> {
        let outcome = self.booker.book(booking).await?;
        if let Err(err) = self
            .booker
            .journal()
            .resolve(booking.ledger_id, &booking.local_tx_id)
            .await
        {
            warn!(error = %err, "booked, but the out-of-sync log entry could not be resolved");
        }
        info!(global_tx_id = %outcome.global_tx_id(), "replayed out-of-sync booking");
        Ok(outcome)
    }

    /// Replay every parked booking; one failure does not stop the rest.
    pub async fn replay_all(&self) -> Result<ReplaySummary, ReconcileError> {
        let mut summary = ReplaySummary::default();
        for entry in self.booker.journal().pending().await? {
            let ledger_id = entry.booking.ledger_id;
            let local_tx_id = entry.booking.local_tx_id;
            match self.replay(ledger_id, &local_tx_id).await {
                Ok(BookingOutcome::Inserted(_)) => summary.booked += 1,
                Ok(BookingOutcome::AlreadyBooked(_)) => summary.already_booked += 1,
                Err(err) => {
                    warn!(%ledger_id, %local_tx_id, error = %err, "replay failed");
                    summary.failed.push((ledger_id, local_tx_id, err.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Recompute every balance from `Transactions` and compare with
    /// `Balances`.
    #[instrument(skip(self), err)]
    pub async fn verify_balances(&self) -> Result<BalanceAudit, ReconcileError> {
        let owners: BTreeMap<(LedgerId, LocalAccountId), GlobalId> = self
            .store
            .list_bindings()
            .await?
            .into_iter()
            .map(|b| ((b.ledger_id, b.local_account_id), b.global_id))
            .collect();

        let mut audit = BalanceAudit::default();
        let mut derived: BTreeMap<(GlobalId, LedgerId), Amount> = BTreeMap::new();
        let mut credit = |ledger_id: LedgerId, local: &LocalAccountId, delta: Amount, audit: &mut BalanceAudit| {
            match owners.get(&(ledger_id, local.clone())) {
                Some(global_id) => {
                    *derived.entry((*global_id, ledger_id)).or_default() += delta;
                }
                None => {
                    let key = (ledger_id, local.clone());
                    if !audit.unresolved_accounts.contains(&key) {
                        audit.unresolved_accounts.push(key);
                    }
                }
            }
        };

        for tx in self.store.list_transactions().await? {
            if let Some(origin) = &tx.origin {
                credit(tx.ledger_id, origin, -tx.amount, &mut audit);
            }
            credit(tx.ledger_id, &tx.dest, tx.amount, &mut audit);
        }

        let mut stored: BTreeMap<(GlobalId, LedgerId), Amount> = self
            .store
            .list_balances()
            .await?
            .into_iter()
            .map(|b| ((b.global_id, b.ledger_id), b.amount))
            .collect();

        for ((global_id, ledger_id), derived) in derived {
            let stored = stored.remove(&(global_id, ledger_id)).unwrap_or(Amount::ZERO);
            if stored != derived {
                audit.mismatches.push(BalanceMismatch {
                    global_id,
                    ledger_id,
                    stored,
                    derived,
                });
            }
        }
        // Balances with no transactions behind them.
        for ((global_id, ledger_id), stored) in stored {
            if !stored.is_zero() {
                audit.mismatches.push(BalanceMismatch {
                    global_id,
                    ledger_id,
                    stored,
                    derived: Amount::ZERO,
                });
            }
        }

        if !audit.is_clean() {
            warn!(
                mismatches = audit.mismatches.len(),
                unresolved = audit.unresolved_accounts.len(),
                "booked balances disagree with transactions"
            );
        }
        Ok(audit)
    }

    /// Compare every bound account's booked balance with the ledger's.
    ///
    /// Only meaningful while no mint/transfer is in flight.
    #[instrument(skip(self), err)]
    pub async fn ledger_divergence(&self) -> Result<LedgerAudit, ReconcileError> {
        let mut audit = LedgerAudit::default();
        for binding in self.store.list_bindings().await? {
            let Some(ledger) = self.adapters.get(binding.ledger_id) else {
                continue;
            };
            let booked = self.store.balance(binding.global_id, binding.ledger_id).await?;
            match ledger.adapter.query_balance(&binding.local_account_id).await {
                Ok(on_ledger) if on_ledger == booked => {}
                Ok(on_ledger) => audit.divergences.push(BalanceDivergence {
                    global_id: binding.global_id,
                    ledger_id: binding.ledger_id,
                    local_account_id: binding.local_account_id,
                    booked,
                    on_ledger,
                }),
                Err(err) => audit
                    .unreachable
                    .push((binding.ledger_id, binding.local_account_id, err.to_string())),
            }
        }
        Ok(audit)
    }

    pub async fn report(&self) -> Result<ReconciliationReport, ReconcileError> {
        Ok(ReconciliationReport {
            out_of_sync: self.out_of_sync().await?,
            balances: self.verify_balances().await?,
            ledgers: self.ledger_divergence().await?,
        })
    }
}
