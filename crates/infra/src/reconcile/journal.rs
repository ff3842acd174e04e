//! Out-of-sync log: bookings whose ledger effect committed but whose
//! bookkeeping commit failed.
//!
//! The log is the replay source for reconciliation. Entries are appended
//! when a booking is parked and marked resolved once it is booked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use mtp_core::{Booking, LedgerId, LocalTxId};

/// A ledger-committed booking waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedBooking {
    pub booking: Booking,
    pub reason: String,
    pub parked_at: DateTime<Utc>,
}

impl ParkedBooking {
    pub fn new(booking: Booking, reason: impl Into<String>) -> Self {
        Self {
            booking,
            reason: reason.into(),
            parked_at: Utc::now(),
        }
    }

    fn key(&self) -> (LedgerId, LocalTxId) {
        (self.booking.ledger_id, self.booking.local_tx_id.clone())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("out-of-sync log io error: {0}")]
    Io(String),

    #[error("malformed out-of-sync log entry at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

#[async_trait]
pub trait OutOfSyncLog: Send + Sync {
    async fn park(&self, entry: ParkedBooking) -> Result<(), JournalError>;

    /// Unresolved entries, oldest first.
    async fn pending(&self) -> Result<Vec<ParkedBooking>, JournalError>;

    async fn resolve(&self, ledger_id: LedgerId, local_tx_id: &LocalTxId) -> Result<(), JournalError>;
}

/// Process-local log; parked bookings do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryOutOfSyncLog {
    entries: Mutex<Vec<ParkedBooking>>,
}

impl InMemoryOutOfSyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<ParkedBooking>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl OutOfSyncLog for InMemoryOutOfSyncLog {
    async fn park(&self, entry: ParkedBooking) -> Result<(), JournalError> {
        let mut entries = self.entries();
        let key = entry.key();
        entries.retain(|e| e.key() != key);
        entries.push(entry);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<ParkedBooking>, JournalError> {
        Ok(self.entries().clone())
    }

    async fn resolve(&self, ledger_id: LedgerId, local_tx_id: &LocalTxId) -> Result<(), JournalError> {
        self.entries()
            .retain(|e| !(e.booking.ledger_id == ledger_id && &e.booking.local_tx_id == local_tx_id));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalRecord {
    Parked(ParkedBooking),
    Resolved {
        ledger_id: LedgerId,
        local_tx_id: LocalTxId,
        resolved_at: DateTime<Utc>,
    },
}

/// Append-only JSON-lines log that survives restarts.
#[derive(Debug)]
pub struct FileOutOfSyncLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileOutOfSyncLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(record).map_err(|e| JournalError::Io(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| JournalError::Io(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| JournalError::Io(e.to_string()))?;
        file.sync_data().await.map_err(|e| JournalError::Io(e.to_string()))
    }
}

#[async_trait]
impl OutOfSyncLog for FileOutOfSyncLog {
    async fn park(&self, entry: ParkedBooking) -> Result<(), JournalError> {
        self.append(&JournalRecord::Parked(entry)).await
    }

    async fn pending(&self) -> Result<Vec<ParkedBooking>, JournalError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::Io(e.to_string())),
        };

        // Insertion order is kept via a sequence number per key.
        let mut open: BTreeMap<(LedgerId, LocalTxId), (usize, ParkedBooking)> = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = serde_json::from_str(line).map_err(|e| JournalError::Malformed {
                line: index + 1,
                message: e.to_string(),
            })?;
            match record {
                JournalRecord::Parked(entry) => {
                    open.insert(entry.key(), (index, entry));
                }
                JournalRecord::Resolved {
                    ledger_id,
                    local_tx_id,
                    ..
                } => {
                    open.remove(&(ledger_id, local_tx_id));
                }
            }
        }

        let mut pending: Vec<_> = open.into_values().collect();
        pending.sort_by_key(|(index, _)| *index);
        Ok(pending.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn resolve(&self, ledger_id: LedgerId, local_tx_id: &LocalTxId) -> Result<(), JournalError> {
        self.append(&JournalRecord::Resolved {
            ledger_id,
            local_tx_id: local_tx_id.clone(),
            resolved_at: Utc::now(),
        })
        .await
    }
}
