//! Mint and transfer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Span, info, instrument, warn};

use mtp_core::{
    Amount, Booking, GlobalId, GlobalTxId, LedgerId, LocalTxId, OperationId, Participant, RequestState,
    TxKind,
};
use mtp_ledgers::LedgerReceipt;

use super::{Coordinator, CoordinatorError};
use crate::bookkeeping::BookkeepingStore;

/// A mint or transfer that reached `BOOKED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookedTransaction {
    pub operation_id: OperationId,
    pub global_tx_id: GlobalTxId,
    pub ledger_id: LedgerId,
    pub local_tx_id: LocalTxId,
    pub kind: TxKind,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    /// `true` when the ledger transaction had been booked before.
    pub already_booked: bool,
}

fn ensure_positive(amount: Amount) -> Result<(), CoordinatorError> {
    if amount.is_negative() || amount.is_zero() {
        return Err(CoordinatorError::Validation(format!(
            "amount must be greater than zero, got {amount}"
        )));
    }
    Ok(())
}

impl<S: BookkeepingStore + 'static> Coordinator<S> {
    /// Mint `amount` of the ledger's asset into `dest`'s account.
    #[instrument(
        skip(self),
        fields(operation_id = tracing::field::Empty, global_tx_id = tracing::field::Empty),
        err
    )]
    pub async fn mint(
        &self,
        ledger_id: LedgerId,
        dest: GlobalId,
        amount: Amount,
    ) -> Result<BookedTransaction, CoordinatorError> {
        let operation_id = OperationId::new();
        Span::current().record("operation_id", tracing::field::display(operation_id));
        ensure_positive(amount)?;

        let ledger = self.ledger(ledger_id)?;
        let dest_local = self.require_binding(dest, ledger_id).await?;

        let global_tx_id = self.reserve_global_tx_id().await?;
        let state = RequestState::Pending;
        let receipt = match self
            .call_adapter(ledger_id, ledger.adapter.mint(&dest_local, amount, &ledger.asset))
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.adapter_failed(state, err)),
        };

        let booking = Booking {
            global_tx_id,
            ledger_id,
            local_tx_id: receipt.local_tx_id.clone(),
            kind: TxKind::Mint,
            origin: None,
            dest: Participant {
                global_id: dest,
                local_account_id: dest_local,
            },
            amount,
            timestamp: receipt.timestamp,
        };
        self.finish(operation_id, state, receipt, booking).await
    }

    /// Move `amount` from `from`'s account to `to`'s account on one ledger.
    #[instrument(
        skip(self, memo),
        fields(operation_id = tracing::field::Empty, global_tx_id = tracing::field::Empty),
        err
    )]
    pub async fn transfer(
        &self,
        ledger_id: LedgerId,
        from: GlobalId,
        to: GlobalId,
        amount: Amount,
        memo: &str,
    ) -> Result<BookedTransaction, CoordinatorError> {
        let operation_id = OperationId::new();
        Span::current().record("operation_id", tracing::field::display(operation_id));
        ensure_positive(amount)?;
        if from == to {
            return Err(CoordinatorError::Validation("cannot transfer to the same identity".to_string()));
        }

        let ledger = self.ledger(ledger_id)?;
        let from_local = self.require_binding(from, ledger_id).await?;
        let to_local = self.require_binding(to, ledger_id).await?;

        // Advisory only: the ledger enforces funds on its own.
        let booked = self.store.balance(from, ledger_id).await?;
        if booked < amount {
            return Err(CoordinatorError::InsufficientFunds {
                ledger_id,
                reason: format!("booked balance {booked} of identity {from} is below {amount}"),
            });
        }

        let global_tx_id = self.reserve_global_tx_id().await?;
        let state = RequestState::Pending;
        let receipt = match self
            .call_adapter(
                ledger_id,
                ledger.adapter.transfer(&from_local, &to_local, amount, memo),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.adapter_failed(state, err)),
        };

        let booking = Booking {
            global_tx_id,
            ledger_id,
            local_tx_id: receipt.local_tx_id.clone(),
            kind: TxKind::Transfer,
            origin: Some(Participant {
                global_id: from,
                local_account_id: from_local,
            }),
            dest: Participant {
                global_id: to,
                local_account_id: to_local,
            },
            amount,
            timestamp: receipt.timestamp,
        };
        self.finish(operation_id, state, receipt, booking).await
    }

    /// Taken before the ledger call so that nothing fallible is left
    /// between a ledger commit and its booking. A failed call leaves a gap
    /// in the sequence; the id is never handed out again.
    async fn reserve_global_tx_id(&self) -> Result<GlobalTxId, CoordinatorError> {
        let id = self.store.allocate_global_tx_id().await?;
        Span::current().record("global_tx_id", id.get());
        Ok(id)
    }

    fn adapter_failed(&self, state: RequestState, err: CoordinatorError) -> CoordinatorError {
        if err.ledger_effect() == super::LedgerEffect::None {
            if let Ok(failed) = state.transition(RequestState::Failed) {
                info!(state = %failed, error = %err, "ledger rejected request; bookkeeping untouched");
            }
        } else {
            warn!(error = %err, "ledger outcome unknown; bookkeeping untouched until reconciled");
        }
        err
    }

    /// Steps after the ledger committed. Forward-only.
    async fn finish(
        &self,
        operation_id: OperationId,
        state: RequestState,
        receipt: LedgerReceipt,
        booking: Booking,
    ) -> Result<BookedTransaction, CoordinatorError> {
        let state = state.transition(RequestState::LedgerCommitted)?;
        info!(state = %state, local_tx_id = %receipt.local_tx_id, "ledger committed");

        let ledger_id = booking.ledger_id;
        let kind = booking.kind;
        let amount = booking.amount;

        // Detached so a dropped caller cannot strand the booking.
        let booker = self.booker.clone();
        let detached = booking.clone();
        let task = tokio::spawn(async move { booker.book_or_park(detached).await });
        let outcome = match task.await {
            Ok(result) => result?,
            Err(join_err) => {
                return Err(self.booker.park(booking, format!("booking task failed: {join_err}")).await);
            }
        };

        Ok(BookedTransaction {
            operation_id,
            global_tx_id: outcome.global_tx_id(),
            ledger_id,
            local_tx_id: receipt.local_tx_id,
            kind,
            amount,
            timestamp: receipt.timestamp,
            already_booked: matches!(outcome, crate::bookkeeping::BookingOutcome::AlreadyBooked(_)),
        })
    }
}
