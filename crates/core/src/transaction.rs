//! Transactions, balances and the mint/transfer request lifecycle.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::DomainError;
use crate::id::{GlobalId, GlobalTxId, LedgerId, LocalAccountId, LocalTxId};

/// Kind of value movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    Mint,
    Transfer,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Mint => "MINT",
            TxKind::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINT" => Ok(TxKind::Mint),
            "TRANSFER" => Ok(TxKind::Transfer),
            other => Err(DomainError::validation(format!("unknown transaction kind: {other}"))),
        }
    }
}

/// One participant of a booking: platform identity plus its local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub global_id: GlobalId,
    pub local_account_id: LocalAccountId,
}

/// Everything needed to book one ledger-confirmed movement.
///
/// Built only after the ledger adapter has reported success; `global_tx_id`
/// is allocated once and travels with the booking through any replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub global_tx_id: GlobalTxId,
    pub ledger_id: LedgerId,
    pub local_tx_id: LocalTxId,
    pub kind: TxKind,
    /// `None` for mints (funds come from the ledger's base supply).
    pub origin: Option<Participant>,
    pub dest: Participant,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

impl Booking {
    /// Balance deltas this booking applies, debit first.
    pub fn deltas(&self) -> Vec<(GlobalId, Amount)> {
        let mut deltas = Vec::with_capacity(2);
        if let Some(origin) = &self.origin {
            deltas.push((origin.global_id, -self.amount));
        }
        deltas.push((self.dest.global_id, self.amount));
        deltas
    }
}

/// A committed row of the `Transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub global_tx_id: GlobalTxId,
    pub ledger_id: LedgerId,
    pub local_tx_id: LocalTxId,
    pub kind: TxKind,
    pub origin: Option<LocalAccountId>,
    pub dest: LocalAccountId,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

/// A row of the `Balances` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub global_id: GlobalId,
    pub ledger_id: LedgerId,
    pub amount: Amount,
}

/// Lifecycle of a single mint/transfer request.
///
/// ```text
/// PENDING ──► LEDGER_COMMITTED ──► BOOKED
///    │                 │              ▲
///    ▼                 ▼              │
///  FAILED         OUT_OF_SYNC ────────┘ (reconciliation replay)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Pending,
    LedgerCommitted,
    Booked,
    Failed,
    OutOfSync,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Pending, LedgerCommitted)
                | (Pending, Failed)
                | (LedgerCommitted, Booked)
                | (LedgerCommitted, OutOfSync)
                | (OutOfSync, Booked)
        )
    }

    pub fn transition(self, next: RequestState) -> Result<RequestState, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::IllegalTransition { from: self, to: next })
        }
    }

    /// True once the external ledger holds the effect.
    pub fn ledger_committed(self) -> bool {
        matches!(
            self,
            RequestState::LedgerCommitted | RequestState::Booked | RequestState::OutOfSync
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Booked | RequestState::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Pending => "PENDING",
            RequestState::LedgerCommitted => "LEDGER_COMMITTED",
            RequestState::Booked => "BOOKED",
            RequestState::Failed => "FAILED",
            RequestState::OutOfSync => "OUT_OF_SYNC",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: u64, local: &str) -> Participant {
        Participant {
            global_id: GlobalId::new(id),
            local_account_id: LocalAccountId::new(local).unwrap(),
        }
    }

    #[test]
    fn success_path_is_pending_committed_booked() {
        let s = RequestState::Pending
            .transition(RequestState::LedgerCommitted)
            .and_then(|s| s.transition(RequestState::Booked))
            .unwrap();
        assert_eq!(s, RequestState::Booked);
        assert!(s.is_terminal());
    }

    #[test]
    fn committed_request_can_never_fail() {
        let err = RequestState::LedgerCommitted
            .transition(RequestState::Failed)
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::IllegalTransition {
                from: RequestState::LedgerCommitted,
                to: RequestState::Failed,
            }
        );
        assert!(!RequestState::OutOfSync.can_transition_to(RequestState::Pending));
        assert!(RequestState::OutOfSync.can_transition_to(RequestState::Booked));
        assert!(RequestState::OutOfSync.ledger_committed());
        assert!(!RequestState::Failed.ledger_committed());
    }

    #[test]
    fn transfer_deltas_debit_origin_and_credit_dest() {
        let booking = Booking {
            global_tx_id: GlobalTxId::new(3),
            ledger_id: LedgerId::new(2),
            local_tx_id: LocalTxId::new("abc").unwrap(),
            kind: TxKind::Transfer,
            origin: Some(participant(1, "alice@test")),
            dest: participant(2, "bob@test"),
            amount: Amount::from_minor(550),
            timestamp: Utc::now(),
        };
        assert_eq!(
            booking.deltas(),
            vec![
                (GlobalId::new(1), Amount::from_minor(-550)),
                (GlobalId::new(2), Amount::from_minor(550)),
            ]
        );
    }

    #[test]
    fn kind_round_trips_through_column_text() {
        assert_eq!("MINT".parse::<TxKind>().unwrap(), TxKind::Mint);
        assert_eq!(TxKind::Transfer.to_string(), "TRANSFER");
        assert!("mint".parse::<TxKind>().is_err());
    }
}
