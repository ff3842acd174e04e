use async_trait::async_trait;
use thiserror::Error;

use mtp_core::{
    Amount, Balance, Booking, DomainError, GlobalId, GlobalTxId, Identity, Ledger, LedgerBinding,
    LedgerId, LocalAccountId, LocalTxId, TransactionRecord,
};

/// Bookkeeping store operation error.
///
/// These are **infrastructure errors** (storage, constraints, decoding) as
/// opposed to domain errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        StoreError::Corrupt(value.to_string())
    }
}

/// Result of [`BookkeepingStore::record_booking`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// Transaction row inserted and balances updated.
    Inserted(GlobalTxId),
    /// A row for the same `(LedgerID, LocalTxID)` already exists; nothing changed.
    AlreadyBooked(GlobalTxId),
}

impl BookingOutcome {
    pub fn global_tx_id(self) -> GlobalTxId {
        match self {
            BookingOutcome::Inserted(id) | BookingOutcome::AlreadyBooked(id) => id,
        }
    }
}

/// Durable local mirror of identities, bindings, transactions and balances.
///
/// ## Write rules
///
/// - `create_identity` allocates `max(GlobalID) + 1` inside the insert, so two
///   writers can never hand out the same id; a name collision surfaces as
///   [`StoreError::UniqueViolation`].
/// - `insert_binding` never overwrites: `(GlobalID, LedgerID)` and
///   `(LedgerID, LocalAccountID)` are both unique.
/// - `allocate_global_tx_id` bumps a persisted counter, so an id handed out
///   once is never handed out again, across restarts and whether or not a
///   transaction is ever booked under it.
/// - `record_booking` is the only writer of `Transactions` and `Balances`.
///   It inserts the transaction row and applies every balance delta in one
///   database transaction, deduplicated by `(LedgerID, LocalTxID)`.
///
/// All statements are parameterized.
#[async_trait]
pub trait BookkeepingStore: Send + Sync {
    async fn list_ledgers(&self) -> Result<Vec<Ledger>, StoreError>;

    async fn find_identity_by_name(&self, name: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_identity(&self, global_id: GlobalId) -> Result<Option<Identity>, StoreError>;

    /// Insert a new identity under the next unused `GlobalID` (starting at 1).
    async fn create_identity(&self, name: &str) -> Result<Identity, StoreError>;

    async fn find_binding(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
    ) -> Result<Option<LedgerBinding>, StoreError>;

    async fn find_binding_by_local(
        &self,
        ledger_id: LedgerId,
        local_account_id: &LocalAccountId,
    ) -> Result<Option<LedgerBinding>, StoreError>;

    /// Persist a binding (and its address row when the credentials carry one).
    async fn insert_binding(&self, binding: &LedgerBinding) -> Result<(), StoreError>;

    async fn list_bindings(&self) -> Result<Vec<LedgerBinding>, StoreError>;

    /// Highest `GlobalTxID` ever committed.
    async fn max_global_tx_id(&self) -> Result<Option<GlobalTxId>, StoreError>;

    /// Reserve the next unused `GlobalTxID`.
    async fn allocate_global_tx_id(&self) -> Result<GlobalTxId, StoreError>;

    /// Make sure every id up to and including `id` counts as handed out.
    async fn reserve_global_tx_ids_through(&self, id: GlobalTxId) -> Result<(), StoreError>;

    async fn find_transaction(
        &self,
        ledger_id: LedgerId,
        local_tx_id: &LocalTxId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// All committed transactions in `GlobalTxID` order.
    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn record_booking(&self, booking: &Booking) -> Result<BookingOutcome, StoreError>;

    /// Booked balance; zero when no row exists yet.
    async fn balance(&self, global_id: GlobalId, ledger_id: LedgerId) -> Result<Amount, StoreError>;

    async fn list_balances(&self) -> Result<Vec<Balance>, StoreError>;
}
