use thiserror::Error;

use mtp_core::{Booking, DomainError, GlobalId, LedgerId};
use mtp_ledgers::AdapterError;

use crate::bookkeeping::StoreError;
use crate::identity::RegistryError;
use crate::reconcile::JournalError;

/// What a failed request may have left behind on the external ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LedgerEffect {
    /// Definitely no external effect; the whole request may be retried.
    None,
    /// The ledger committed; bookkeeping lags until reconciled.
    Committed,
    /// Submitted, outcome unknown. Must be reconciled before any retry.
    Indeterminate,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no adapter registered for ledger {0}")]
    UnknownLedger(LedgerId),

    #[error("identity {global_id} has no account on ledger {ledger_id}")]
    UnboundAccount { global_id: GlobalId, ledger_id: LedgerId },

    #[error("binding conflict: {0}")]
    AlreadyBound(String),

    #[error("ledger {ledger_id} unavailable: {reason}")]
    LedgerUnavailable { ledger_id: LedgerId, reason: String },

    #[error("insufficient funds on ledger {ledger_id}: {reason}")]
    InsufficientFunds { ledger_id: LedgerId, reason: String },

    #[error("insufficient supply on ledger {ledger_id}: {reason}")]
    InsufficientSupply { ledger_id: LedgerId, reason: String },

    #[error("ledger {ledger_id} aborted the operation: {reason}")]
    AdapterAborted { ledger_id: LedgerId, reason: String },

    #[error("ledger {ledger_id} outcome unknown: {reason}")]
    LedgerOutcomeUnknown { ledger_id: LedgerId, reason: String },

    /// The ledger committed but the bookkeeping commit failed.
    ///
    /// `booking` is enough to replay the commit; `parked` is false when the
    /// out-of-sync log could not record it either.
    #[error(
        "ledger tx {} on ledger {} committed but not booked (GlobalTxID {}): {reason}",
        .booking.local_tx_id,
        .booking.ledger_id,
        .booking.global_tx_id
    )]
    OutOfSync {
        booking: Box<Booking>,
        parked: bool,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl CoordinatorError {
    pub fn ledger_effect(&self) -> LedgerEffect {
        match self {
            CoordinatorError::OutOfSync { .. } => LedgerEffect::Committed,
            CoordinatorError::LedgerOutcomeUnknown { .. } => LedgerEffect::Indeterminate,
            _ => LedgerEffect::None,
        }
    }

    /// The committed-but-unbooked transaction, if this is an out-of-sync error.
    pub fn unbooked(&self) -> Option<&Booking> {
        match self {
            CoordinatorError::OutOfSync { booking, .. } => Some(booking),
            _ => None,
        }
    }

    /// Transient failure with no external effect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::LedgerUnavailable { .. })
    }

    pub(crate) fn from_adapter(ledger_id: LedgerId, err: AdapterError) -> Self {
        match err {
            AdapterError::Unavailable(reason) => CoordinatorError::LedgerUnavailable { ledger_id, reason },
            AdapterError::InsufficientFunds(reason) => CoordinatorError::InsufficientFunds { ledger_id, reason },
            AdapterError::InsufficientSupply(reason) => CoordinatorError::InsufficientSupply { ledger_id, reason },
            AdapterError::Indeterminate(reason) => CoordinatorError::LedgerOutcomeUnknown { ledger_id, reason },
            other @ (AdapterError::Aborted(_)
            | AdapterError::NotFound(_)
            | AdapterError::Invalid(_)
            | AdapterError::AlreadyExists { .. }) => CoordinatorError::AdapterAborted {
                ledger_id,
                reason: other.to_string(),
            },
        }
    }
}

impl From<DomainError> for CoordinatorError {
    fn from(value: DomainError) -> Self {
        CoordinatorError::Validation(value.to_string())
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::InvalidName(msg) => CoordinatorError::Validation(msg),
            RegistryError::AlreadyBound { .. } | RegistryError::LocalAccountClaimed { .. } => {
                CoordinatorError::AlreadyBound(value.to_string())
            }
            RegistryError::UnknownIdentity(global_id) => {
                CoordinatorError::Validation(format!("unknown identity {global_id}"))
            }
            RegistryError::Store(err) => CoordinatorError::Store(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mtp_core::{Amount, GlobalTxId, LocalAccountId, LocalTxId, Participant, TxKind};

    #[test]
    fn only_post_submission_errors_carry_ledger_effects() {
        let ledger_id = LedgerId::new(2);
        let booking = Booking {
            global_tx_id: GlobalTxId::new(1),
            ledger_id,
            local_tx_id: LocalTxId::new("abc").unwrap(),
            kind: TxKind::Mint,
            origin: None,
            dest: Participant {
                global_id: GlobalId::new(1),
                local_account_id: LocalAccountId::new("alice@test").unwrap(),
            },
            amount: Amount::from_minor(300),
            timestamp: Utc::now(),
        };
        let out_of_sync = CoordinatorError::OutOfSync {
            booking: Box::new(booking.clone()),
            parked: false,
            reason: "disk full".into(),
        };
        assert_eq!(out_of_sync.ledger_effect(), LedgerEffect::Committed);
        assert_eq!(out_of_sync.unbooked(), Some(&booking));
        assert!(out_of_sync.to_string().contains("ledger tx abc on ledger 2"), "{out_of_sync}");

        let unknown = CoordinatorError::from_adapter(ledger_id, AdapterError::Indeterminate("lost".into()));
        assert_eq!(unknown.ledger_effect(), LedgerEffect::Indeterminate);

        let unavailable = CoordinatorError::from_adapter(ledger_id, AdapterError::Unavailable("down".into()));
        assert_eq!(unavailable.ledger_effect(), LedgerEffect::None);
        assert!(unavailable.is_retryable());

        let aborted = CoordinatorError::from_adapter(ledger_id, AdapterError::NotFound("x".into()));
        assert!(matches!(aborted, CoordinatorError::AdapterAborted { .. }));
        assert!(!aborted.is_retryable());
    }
}
