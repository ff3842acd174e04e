//! Step 5 of a mint/transfer: the bookkeeping commit, or parking the booking
//! when that commit fails.

use std::sync::Arc;

use tracing::{error, info, warn};

use mtp_core::{Booking, RequestState};

use super::error::CoordinatorError;
use crate::bookkeeping::{BookingOutcome, BookkeepingStore, StoreError};
use crate::locks::AccountLocks;
use crate::reconcile::{OutOfSyncLog, ParkedBooking};

pub(crate) struct Booker<S> {
    store: Arc<S>,
    locks: Arc<AccountLocks>,
    journal: Arc<dyn OutOfSyncLog>,
}

impl<S> Clone for Booker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            journal: Arc::clone(&self.journal),
        }
    }
}

impl<S: BookkeepingStore + 'static> Booker<S> {
    pub(crate) fn new(store: Arc<S>, locks: Arc<AccountLocks>, journal: Arc<dyn OutOfSyncLog>) -> Self {
        Self { store, locks, journal }
    }

    pub(crate) fn journal(&self) -> &Arc<dyn OutOfSyncLog> {
        &self.journal
    }

    /// Commit `booking` under the participants' account scopes.
    ///
    /// Deduplicated by `(LedgerID, LocalTxID)`, so it is safe to repeat.
    pub(crate) async fn book(&self, booking: &Booking) -> Result<BookingOutcome, StoreError> {
        let keys = booking
            .deltas()
            .into_iter()
            .map(|(global_id, _)| (global_id, booking.ledger_id));
        let _guards = self.locks.lock_all(keys).await;
        self.store.record_booking(booking).await
    }

    /// Drive a ledger-committed booking to `BOOKED`, or park it `OUT_OF_SYNC`.
    pub(crate) async fn book_or_park(&self, booking: Booking) -> Result<BookingOutcome, CoordinatorError> {
        let committed = RequestState::LedgerCommitted;
        match self.book(&booking).await {
            Ok(outcome) => {
                let state = committed.transition(RequestState::Booked)?;
                if let BookingOutcome::AlreadyBooked(existing) = outcome {
                    warn!(global_tx_id = %existing, local_tx_id = %booking.local_tx_id, "ledger tx was already booked");
                }
                info!(
                    state = %state,
                    global_tx_id = %outcome.global_tx_id(),
                    local_tx_id = %booking.local_tx_id,
                    "request booked"
                );
                Ok(outcome)
            }
            Err(err) => {
                let state = committed.transition(RequestState::OutOfSync)?;
                error!(
                    state = %state,
                    global_tx_id = %booking.global_tx_id,
                    ledger_id = %booking.ledger_id,
                    local_tx_id = %booking.local_tx_id,
                    error = %err,
                    "bookkeeping commit failed after ledger commit; parking for reconciliation"
                );
                Err(self.park(booking, err.to_string()).await)
            }
        }
    }

    /// Record `booking` in the out-of-sync log and build the error handed
    /// back to the caller. The error carries the full booking either way, so
    /// a failed log write still leaves the caller able to replay it.
    pub(crate) async fn park(&self, booking: Booking, reason: String) -> CoordinatorError {
        let parked = match self.journal.park(ParkedBooking::new(booking.clone(), reason.clone())).await {
            Ok(()) => true,
            Err(journal_err) => {
                error!(
                    booking = ?booking,
                    error = %journal_err,
                    "failed to write out-of-sync log; booking only survives in the returned error"
                );
                false
            }
        };
        CoordinatorError::OutOfSync {
            booking: Box::new(booking),
            parked,
            reason,
        }
    }
}
