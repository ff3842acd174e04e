//! SQLite-backed bookkeeping store.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLite extended code | `StoreError` |
//! |------------|----------------------|--------------|
//! | Database (unique) | `2067` (`SQLITE_CONSTRAINT_UNIQUE`) | `UniqueViolation` |
//! | Database (primary key) | `1555` (`SQLITE_CONSTRAINT_PRIMARYKEY`) | `UniqueViolation` |
//! | Database (other) | any other | `Database` |
//! | ColumnDecode / ColumnNotFound | n/a | `Corrupt` |
//! | anything else (pool closed, io) | n/a | `Database` |
//!
//! ## Column encodings
//!
//! - `Transactions.Amount` is `REAL` in major units; it is exact for every
//!   two-decimal amount the platform can hold and is rounded back to minor
//!   units on read.
//! - `Balances.Amount` is major units too, so the stored balance equals the
//!   signed sum of `Transactions.Amount`. The column has `INTEGER` affinity:
//!   whole amounts stay integers, fractional ones are kept as `REAL`. Every
//!   update rounds to two decimals so repeated deltas never drift, and reads
//!   go through `CAST(Amount AS REAL)`.
//! - `GlobalTxCounter` holds the next unused `GlobalTxID`.
//! - `Transactions.Timestamp` is Unix milliseconds.
//! - `Transactions.Origin` is `NULL` for mints.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{Span, debug, instrument};

use mtp_core::{
    Amount, Balance, Booking, Credentials, GlobalId, GlobalTxId, Identity, Ledger, LedgerBinding,
    LedgerId, LocalAccountId, LocalTxId, TransactionRecord, TxKind,
};

use super::r#trait::{BookingOutcome, BookkeepingStore, StoreError};
use super::schema;
use crate::config::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. The schema is not touched.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the configured database, migrate it and
    /// seed the ledger master data.
    #[instrument(skip(config, ledgers), fields(url = %config.url), err)]
    pub async fn open(config: &DatabaseConfig, ledgers: &[Ledger]) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| map_sqlx_error("parse_url", e))?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if is_memory_url(&config.url) {
            // Every connection to `:memory:` is a separate database.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        schema::migrate(&pool).await?;
        schema::seed_ledgers(&pool, ledgers).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database with the default ledgers seeded.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(&DatabaseConfig::in_memory(), &mtp_core::default_ledgers()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Empty every table and re-seed `ledgers`.
    pub async fn rebuild(&self, ledgers: &[Ledger]) -> Result<(), StoreError> {
        schema::reset(&self.pool, ledgers).await
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Map SQLx errors to `StoreError`, tagging the failed operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::UniqueViolation(format!("{operation}: {err}"));
    }
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}

/// Check if an error is a unique or primary-key constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return matches!(code.as_ref(), "2067" | "1555");
        }
    }
    false
}

fn decode_timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

fn identity_from_row(row: &SqliteRow) -> Result<Identity, StoreError> {
    let global_id: i64 = row.try_get("GlobalID").map_err(|e| map_sqlx_error("decode_identity", e))?;
    let name: String = row.try_get("Name").map_err(|e| map_sqlx_error("decode_identity", e))?;
    Ok(Identity {
        global_id: GlobalId::from_db(global_id)?,
        name,
    })
}

fn binding_from_row(row: &SqliteRow) -> Result<LedgerBinding, StoreError> {
    let decode = |e| map_sqlx_error("decode_binding", e);
    let global_id: i64 = row.try_get("GlobalID").map_err(decode)?;
    let ledger_id: i64 = row.try_get("LedgerID").map_err(decode)?;
    let local: String = row.try_get("LocalAccountID").map_err(decode)?;
    let credentials: String = row.try_get("Credentials").map_err(decode)?;
    Ok(LedgerBinding {
        global_id: GlobalId::from_db(global_id)?,
        ledger_id: LedgerId::from_db(ledger_id)?,
        local_account_id: LocalAccountId::new(local)?,
        credentials: Credentials::from_text(&credentials)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<TransactionRecord, StoreError> {
    let decode = |e| map_sqlx_error("decode_transaction", e);
    let global_tx_id: i64 = row.try_get("GlobalTxID").map_err(decode)?;
    let ledger_id: i64 = row.try_get("LedgerID").map_err(decode)?;
    let local_tx_id: String = row.try_get("LocalTxID").map_err(decode)?;
    let kind: String = row.try_get("Kind").map_err(decode)?;
    let origin: Option<String> = row.try_get("Origin").map_err(decode)?;
    let dest: String = row.try_get("Dest").map_err(decode)?;
    let amount: f64 = row.try_get("Amount").map_err(decode)?;
    let timestamp: i64 = row.try_get("Timestamp").map_err(decode)?;
    Ok(TransactionRecord {
        global_tx_id: GlobalTxId::from_db(global_tx_id)?,
        ledger_id: LedgerId::from_db(ledger_id)?,
        local_tx_id: LocalTxId::new(local_tx_id)?,
        kind: TxKind::from_str(&kind)?,
        origin: origin.map(LocalAccountId::new).transpose()?,
        dest: LocalAccountId::new(dest)?,
        amount: Amount::from_f64(amount)?,
        timestamp: decode_timestamp(timestamp)?,
    })
}

const TRANSACTION_COLUMNS: &str =
    "GlobalTxID, LedgerID, LocalTxID, Kind, Origin, Dest, Amount, Timestamp";

#[async_trait]
impl BookkeepingStore for SqliteStore {
    async fn list_ledgers(&self) -> Result<Vec<Ledger>, StoreError> {
        let rows = sqlx::query("SELECT LedgerID, LedgerName FROM Ledgers ORDER BY LedgerID")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_ledgers", e))?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("LedgerID").map_err(|e| map_sqlx_error("decode_ledger", e))?;
                let name: String = row.try_get("LedgerName").map_err(|e| map_sqlx_error("decode_ledger", e))?;
                Ok(Ledger::new(LedgerId::from_db(id)?, name))
            })
            .collect()
    }

    async fn find_identity_by_name(&self, name: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query("SELECT GlobalID, Name FROM Users WHERE Name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_identity_by_name", e))?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_identity(&self, global_id: GlobalId) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query("SELECT GlobalID, Name FROM Users WHERE GlobalID = ?")
            .bind(global_id.to_db())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_identity", e))?;
        row.as_ref().map(identity_from_row).transpose()
    }

    #[instrument(skip(self), fields(global_id = tracing::field::Empty), err)]
    async fn create_identity(&self, name: &str) -> Result<Identity, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO Users (GlobalID, Name)
            SELECT COALESCE(MAX(GlobalID), 0) + 1, ? FROM Users
            RETURNING GlobalID, Name
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_identity", e))?;
        let identity = identity_from_row(&row)?;
        Span::current().record("global_id", identity.global_id.get());
        Ok(identity)
    }

    async fn find_binding(
        &self,
        global_id: GlobalId,
        ledger_id: LedgerId,
    ) -> Result<Option<LedgerBinding>, StoreError> {
        let row = sqlx::query(
            "SELECT GlobalID, LedgerID, LocalAccountID, Credentials FROM LedgerAccounts WHERE GlobalID = ? AND LedgerID = ?",
        )
        .bind(global_id.to_db())
        .bind(ledger_id.to_db())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_binding", e))?;
        row.as_ref().map(binding_from_row).transpose()
    }

    async fn find_binding_by_local(
        &self,
        ledger_id: LedgerId,
        local_account_id: &LocalAccountId,
    ) -> Result<Option<LedgerBinding>, StoreError> {
        let row = sqlx::query(
            "SELECT GlobalID, LedgerID, LocalAccountID, Credentials FROM LedgerAccounts WHERE LedgerID = ? AND LocalAccountID = ?",
        )
        .bind(ledger_id.to_db())
        .bind(local_account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_binding_by_local", e))?;
        row.as_ref().map(binding_from_row).transpose()
    }

    #[instrument(
        skip(self, binding),
        fields(
            global_id = %binding.global_id,
            ledger_id = %binding.ledger_id,
            local_account_id = %binding.local_account_id
        ),
        err
    )]
    async fn insert_binding(&self, binding: &LedgerBinding) -> Result<(), StoreError> {
        let credentials = binding.credentials.to_text()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            "INSERT INTO LedgerAccounts (GlobalID, LedgerID, LocalAccountID, Credentials) VALUES (?, ?, ?, ?)",
        )
        .bind(binding.global_id.to_db())
        .bind(binding.ledger_id.to_db())
        .bind(binding.local_account_id.as_str())
        .bind(&credentials)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_binding", e))?;

        if let Some(address) = &binding.credentials.address {
            sqlx::query(
                r#"
                INSERT INTO Addresses (GlobalID, LedgerID, CTAddress, ConfidentialKey, NonCTAddress, AddressPrivKey)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(binding.global_id.to_db())
            .bind(binding.ledger_id.to_db())
            .bind(&address.ct_address)
            .bind(&address.confidential_key)
            .bind(&address.non_ct_address)
            .bind(&address.private_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_address", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn list_bindings(&self) -> Result<Vec<LedgerBinding>, StoreError> {
        let rows = sqlx::query(
            "SELECT GlobalID, LedgerID, LocalAccountID, Credentials FROM LedgerAccounts ORDER BY GlobalID, LedgerID",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_bindings", e))?;
        rows.iter().map(binding_from_row).collect()
    }

    async fn max_global_tx_id(&self) -> Result<Option<GlobalTxId>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(GlobalTxID) FROM Transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("max_global_tx_id", e))?;
        Ok(max.map(GlobalTxId::from_db).transpose()?)
    }

    async fn allocate_global_tx_id(&self) -> Result<GlobalTxId, StoreError> {
        // Never behind the booked maximum, even for rows written elsewhere.
        let allocated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE GlobalTxCounter
            SET NextGlobalTxID = MAX(
                NextGlobalTxID,
                (SELECT COALESCE(MAX(GlobalTxID), 0) + 1 FROM Transactions)
            ) + 1
            WHERE Id = 0
            RETURNING NextGlobalTxID - 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("allocate_global_tx_id", e))?;
        let allocated = allocated.ok_or_else(|| StoreError::Corrupt("GlobalTxCounter row is missing".to_string()))?;
        let id = GlobalTxId::from_db(allocated)?;
        debug!(global_tx_id = %id, "allocated GlobalTxID");
        Ok(id)
    }

    async fn reserve_global_tx_ids_through(&self, id: GlobalTxId) -> Result<(), StoreError> {
        sqlx::query("UPDATE GlobalTxCounter SET NextGlobalTxID = MAX(NextGlobalTxID, ? + 1) WHERE Id = 0")
            .bind(id.to_db())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("reserve_global_tx_ids", e))?;
        Ok(())
    }

    async fn find_transaction(
        &self,
        ledger_id: LedgerId,
        local_tx_id: &LocalTxId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM Transactions WHERE LedgerID = ? AND LocalTxID = ?");
        let row = sqlx::query(&sql)
            .bind(ledger_id.to_db())
            .bind(local_tx_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_transaction", e))?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM Transactions ORDER BY GlobalTxID");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transactions", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// Insert the transaction row and apply its balance deltas atomically.
    #[instrument(
        skip(self, booking),
        fields(
            global_tx_id = %booking.global_tx_id,
            ledger_id = %booking.ledger_id,
            local_tx_id = %booking.local_tx_id,
            kind = %booking.kind
        ),
        err
    )]
    async fn record_booking(&self, booking: &Booking) -> Result<BookingOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT GlobalTxID FROM Transactions WHERE LedgerID = ? AND LocalTxID = ?")
                .bind(booking.ledger_id.to_db())
                .bind(booking.local_tx_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_duplicate", e))?;
        if let Some(existing) = existing {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            debug!(existing, "transaction already booked");
            return Ok(BookingOutcome::AlreadyBooked(GlobalTxId::from_db(existing)?));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO Transactions (GlobalTxID, LedgerID, LocalTxID, Kind, Origin, Dest, Amount, Timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(booking.global_tx_id.to_db())
        .bind(booking.ledger_id.to_db())
        .bind(booking.local_tx_id.as_str())
        .bind(booking.kind.as_str())
        .bind(booking.origin.as_ref().map(|p| p.local_account_id.as_str()))
        .bind(booking.dest.local_account_id.as_str())
        .bind(booking.amount.to_f64())
        .bind(booking.timestamp.timestamp_millis())
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            let mapped = map_sqlx_error("insert_transaction", err);
            drop(tx);
            // A concurrent writer may have booked the same ledger tx first.
            if matches!(mapped, StoreError::UniqueViolation(_)) {
                if let Some(record) = self.find_transaction(booking.ledger_id, &booking.local_tx_id).await? {
                    return Ok(BookingOutcome::AlreadyBooked(record.global_tx_id));
                }
            }
            return Err(mapped);
        }

        for (global_id, delta) in booking.deltas() {
            sqlx::query(
                r#"
                INSERT INTO Balances (GlobalID, LedgerID, Amount)
                VALUES (?, ?, ?)
                ON CONFLICT (GlobalID, LedgerID)
                DO UPDATE SET Amount = ROUND(Amount + excluded.Amount, 2)
                "#,
            )
            .bind(global_id.to_db())
            .bind(booking.ledger_id.to_db())
            .bind(delta.to_f64())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_balance", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(BookingOutcome::Inserted(booking.global_tx_id))
    }

    async fn balance(&self, global_id: GlobalId, ledger_id: LedgerId) -> Result<Amount, StoreError> {
        let amount: Option<f64> =
            sqlx::query_scalar("SELECT CAST(Amount AS REAL) FROM Balances WHERE GlobalID = ? AND LedgerID = ?")
                .bind(global_id.to_db())
                .bind(ledger_id.to_db())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("balance", e))?;
        match amount {
            Some(amount) => Ok(Amount::from_f64(amount)?),
            None => Ok(Amount::ZERO),
        }
    }

    async fn list_balances(&self) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query("SELECT GlobalID, LedgerID, CAST(Amount AS REAL) AS Amount FROM Balances ORDER BY GlobalID, LedgerID")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_balances", e))?;
        rows.iter()
            .map(|row| {
                let decode = |e| map_sqlx_error("decode_balance", e);
                let global_id: i64 = row.try_get("GlobalID").map_err(decode)?;
                let ledger_id: i64 = row.try_get("LedgerID").map_err(decode)?;
                let amount: f64 = row.try_get("Amount").map_err(decode)?;
                Ok(Balance {
                    global_id: GlobalId::from_db(global_id)?,
                    ledger_id: LedgerId::from_db(ledger_id)?,
                    amount: Amount::from_f64(amount)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mtp_core::{Participant, UtxoAddress};

    fn booking(global_tx_id: u64, local: &str, origin: Option<(u64, &str)>, dest: (u64, &str), minor: i64) -> Booking {
        Booking {
            global_tx_id: GlobalTxId::new(global_tx_id),
            ledger_id: LedgerId::new(2),
            local_tx_id: LocalTxId::new(local).unwrap(),
            kind: if origin.is_some() { TxKind::Transfer } else { TxKind::Mint },
            origin: origin.map(|(g, l)| Participant {
                global_id: GlobalId::new(g),
                local_account_id: LocalAccountId::new(l).unwrap(),
            }),
            dest: Participant {
                global_id: GlobalId::new(dest.0),
                local_account_id: LocalAccountId::new(dest.1).unwrap(),
            },
            amount: Amount::from_minor(minor),
            timestamp: Utc::now(),
        }
    }

    async fn store_with_users(names: &[&str]) -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        for name in names {
            store.create_identity(name).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn seeded_ledgers_are_listed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let ledgers = store.list_ledgers().await.unwrap();
        assert_eq!(ledgers, mtp_core::default_ledgers());
    }

    #[tokio::test]
    async fn identities_are_numbered_from_one_and_names_are_unique() {
        let store = SqliteStore::in_memory().await.unwrap();
        let alice = store.create_identity("alice").await.unwrap();
        let bob = store.create_identity("bob").await.unwrap();
        assert_eq!(alice.global_id, GlobalId::new(1));
        assert_eq!(bob.global_id, GlobalId::new(2));

        let dup = store.create_identity("alice").await.unwrap_err();
        assert!(matches!(dup, StoreError::UniqueViolation(_)));
        assert_eq!(store.find_identity_by_name("bob").await.unwrap(), Some(bob));
    }

    #[tokio::test]
    async fn binding_with_address_writes_address_row() {
        let store = store_with_users(&["alice"]).await;
        let binding = LedgerBinding {
            global_id: GlobalId::new(1),
            ledger_id: LedgerId::new(1),
            local_account_id: LocalAccountId::new("alice_ewallet").unwrap(),
            credentials: Credentials {
                address: Some(UtxoAddress {
                    ct_address: "el1qq".into(),
                    confidential_key: "ck".into(),
                    non_ct_address: "ert1q".into(),
                    private_key: "pk".into(),
                }),
                ..Credentials::default()
            },
        };
        store.insert_binding(&binding).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Addresses WHERE GlobalID = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store
                .find_binding_by_local(LedgerId::new(1), &binding.local_account_id)
                .await
                .unwrap(),
            Some(binding.clone())
        );
        assert!(matches!(
            store.insert_binding(&binding).await.unwrap_err(),
            StoreError::UniqueViolation(_)
        ));
    }

    #[tokio::test]
    async fn booking_updates_both_balances_and_dedupes_by_local_tx_id() {
        let store = store_with_users(&["alice", "bob"]).await;
        store
            .record_booking(&booking(1, "m1", None, (1, "alice@test"), 5000))
            .await
            .unwrap();
        let transfer = booking(2, "t1", Some((1, "alice@test")), (2, "bob@test"), 550);
        assert_eq!(
            store.record_booking(&transfer).await.unwrap(),
            BookingOutcome::Inserted(GlobalTxId::new(2))
        );

        let mut replay = transfer.clone();
        replay.global_tx_id = GlobalTxId::new(9);
        assert_eq!(
            store.record_booking(&replay).await.unwrap(),
            BookingOutcome::AlreadyBooked(GlobalTxId::new(2))
        );

        assert_eq!(store.balance(GlobalId::new(1), LedgerId::new(2)).await.unwrap(), Amount::from_minor(4450));
        assert_eq!(store.balance(GlobalId::new(2), LedgerId::new(2)).await.unwrap(), Amount::from_minor(550));
        assert_eq!(store.max_global_tx_id().await.unwrap(), Some(GlobalTxId::new(2)));

        let rows = store.list_transactions().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].origin, None);
        assert_eq!(rows[1].amount, Amount::from_minor(550));
        assert_eq!(rows[1].origin.as_ref().map(|o| o.as_str()), Some("alice@test"));
    }

    #[tokio::test]
    async fn balances_are_stored_in_major_units_like_transactions() {
        let store = store_with_users(&["alice", "bob"]).await;
        store
            .record_booking(&booking(1, "m1", None, (1, "alice@test"), 5000))
            .await
            .unwrap();
        store
            .record_booking(&booking(2, "m2", None, (2, "bob@test"), 1500))
            .await
            .unwrap();
        store
            .record_booking(&booking(3, "t1", Some((1, "alice@test")), (2, "bob@test"), 550))
            .await
            .unwrap();

        let raw: Vec<(i64, f64)> =
            sqlx::query_as("SELECT GlobalID, CAST(Amount AS REAL) FROM Balances ORDER BY GlobalID")
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(raw, vec![(1, 44.5), (2, 20.5)]);

        let signed_sum: f64 = sqlx::query_scalar(
            "SELECT SUM(CASE WHEN Dest = 'bob@test' THEN Amount WHEN Origin = 'bob@test' THEN -Amount ELSE 0 END) FROM Transactions",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(signed_sum, 20.5);
    }

    #[tokio::test]
    async fn many_small_deltas_do_not_drift() {
        let store = store_with_users(&["alice"]).await;
        for i in 0..30 {
            store
                .record_booking(&booking(i + 1, &format!("m{i}"), None, (1, "alice@test"), 10))
                .await
                .unwrap();
        }
        assert_eq!(store.balance(GlobalId::new(1), LedgerId::new(2)).await.unwrap(), Amount::from_minor(300));
        let raw: f64 = sqlx::query_scalar("SELECT CAST(Amount AS REAL) FROM Balances")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(raw, 3.0);
    }

    #[tokio::test]
    async fn global_tx_ids_are_unique_under_concurrency() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.allocate_global_tx_id().await.unwrap() }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().get());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn allocated_ids_survive_reopen_even_when_never_booked() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("books.db").display()),
            ..DatabaseConfig::default()
        };
        let ledgers = mtp_core::default_ledgers();

        let store = SqliteStore::open(&config, &ledgers).await.unwrap();
        store.create_identity("alice").await.unwrap();
        assert_eq!(store.allocate_global_tx_id().await.unwrap(), GlobalTxId::new(1));
        let booked = store.allocate_global_tx_id().await.unwrap();
        store
            .record_booking(&booking(booked.get(), "m1", None, (1, "alice@test"), 100))
            .await
            .unwrap();
        // Reserved and lost, e.g. the ledger call failed.
        assert_eq!(store.allocate_global_tx_id().await.unwrap(), GlobalTxId::new(3));
        store.pool().close().await;

        let reopened = SqliteStore::open(&config, &ledgers).await.unwrap();
        assert_eq!(reopened.max_global_tx_id().await.unwrap(), Some(GlobalTxId::new(2)));
        assert_eq!(reopened.allocate_global_tx_id().await.unwrap(), GlobalTxId::new(4));

        reopened.reserve_global_tx_ids_through(GlobalTxId::new(10)).await.unwrap();
        reopened.reserve_global_tx_ids_through(GlobalTxId::new(6)).await.unwrap();
        assert_eq!(reopened.allocate_global_tx_id().await.unwrap(), GlobalTxId::new(11));
    }

    #[tokio::test]
    async fn rebuild_empties_tables_and_reseeds() {
        let store = store_with_users(&["alice"]).await;
        store
            .record_booking(&booking(1, "m1", None, (1, "alice@test"), 100))
            .await
            .unwrap();

        store.rebuild(&mtp_core::default_ledgers()).await.unwrap();

        assert!(store.find_identity_by_name("alice").await.unwrap().is_none());
        assert!(store.list_transactions().await.unwrap().is_empty());
        assert!(store.list_balances().await.unwrap().is_empty());
        assert_eq!(store.list_ledgers().await.unwrap().len(), 2);
        assert_eq!(store.allocate_global_tx_id().await.unwrap(), GlobalTxId::new(1));
    }
}
