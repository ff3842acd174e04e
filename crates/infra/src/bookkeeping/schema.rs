//! Bookkeeping schema, ledger master data and full rebuild.

use sqlx::SqlitePool;
use tracing::{info, instrument};

use mtp_core::Ledger;

use super::sqlite::map_sqlx_error;
use super::r#trait::StoreError;

/// Table definitions, in dependency order.
const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS Ledgers (
        LedgerID INTEGER PRIMARY KEY,
        LedgerName TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Users (
        GlobalID INTEGER PRIMARY KEY,
        Name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS LedgerAccounts (
        GlobalID INTEGER NOT NULL REFERENCES Users (GlobalID),
        LedgerID INTEGER NOT NULL REFERENCES Ledgers (LedgerID),
        LocalAccountID TEXT NOT NULL,
        Credentials TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (GlobalID, LedgerID),
        UNIQUE (LedgerID, LocalAccountID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Addresses (
        GlobalID INTEGER NOT NULL REFERENCES Users (GlobalID),
        LedgerID INTEGER NOT NULL REFERENCES Ledgers (LedgerID),
        CTAddress TEXT NOT NULL,
        ConfidentialKey TEXT NOT NULL,
        NonCTAddress TEXT NOT NULL,
        AddressPrivKey TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Transactions (
        GlobalTxID INTEGER PRIMARY KEY,
        LedgerID INTEGER NOT NULL REFERENCES Ledgers (LedgerID),
        LocalTxID TEXT NOT NULL,
        Kind TEXT NOT NULL CHECK (Kind IN ('MINT', 'TRANSFER')),
        Origin TEXT,
        Dest TEXT NOT NULL,
        Amount REAL NOT NULL CHECK (Amount >= 0),
        Timestamp INTEGER NOT NULL,
        UNIQUE (LedgerID, LocalTxID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Balances (
        GlobalID INTEGER NOT NULL REFERENCES Users (GlobalID),
        LedgerID INTEGER NOT NULL REFERENCES Ledgers (LedgerID),
        Amount INTEGER NOT NULL,
        PRIMARY KEY (GlobalID, LedgerID)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS GlobalTxCounter (
        Id INTEGER PRIMARY KEY CHECK (Id = 0),
        NextGlobalTxID INTEGER NOT NULL CHECK (NextGlobalTxID > 0)
    )
    "#,
];

/// Child tables first so foreign keys never block the wipe.
const WIPE_ORDER: &[&str] = &[
    "DELETE FROM GlobalTxCounter",
    "DELETE FROM Balances",
    "DELETE FROM Transactions",
    "DELETE FROM Addresses",
    "DELETE FROM LedgerAccounts",
    "DELETE FROM Users",
    "DELETE FROM Ledgers",
];

/// Create any missing tables and the `GlobalTxID` counter row.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    for ddl in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
    }
    seed_counter(pool).await
}

/// The counter starts past every booked transaction; an existing row is
/// never lowered.
async fn seed_counter(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO GlobalTxCounter (Id, NextGlobalTxID)
        SELECT 0, COALESCE(MAX(GlobalTxID), 0) + 1 FROM Transactions
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("seed_counter", e))?;
    Ok(())
}

/// Insert ledger master data; existing rows are left alone.
pub async fn seed_ledgers(pool: &SqlitePool, ledgers: &[Ledger]) -> Result<(), StoreError> {
    for ledger in ledgers {
        sqlx::query("INSERT INTO Ledgers (LedgerID, LedgerName) VALUES (?, ?) ON CONFLICT (LedgerID) DO NOTHING")
            .bind(ledger.ledger_id.to_db())
            .bind(&ledger.name)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("seed_ledgers", e))?;
    }
    Ok(())
}

/// Empty every table, then re-seed the ledger master data.
#[instrument(skip(pool, ledgers), fields(ledgers = ledgers.len()), err)]
pub async fn reset(pool: &SqlitePool, ledgers: &[Ledger]) -> Result<(), StoreError> {
    migrate(pool).await?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;
    for statement in WIPE_ORDER {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("reset", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))?;

    seed_counter(pool).await?;
    seed_ledgers(pool, ledgers).await?;
    info!("bookkeeping database rebuilt");
    Ok(())
}
