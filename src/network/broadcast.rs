//! Transaction broadcasting
//!
//! The engine hands fully-signed transactions to a [`Broadcaster`]. Relaying
//! them to the blockchain network is somebody else's job: the outbox
//! broadcaster appends each transaction to a JSON-lines file that an external
//! relay tails.

use crate::core::{Transaction, TxId};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Broadcast errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("Network unavailable: {0}")]
    Unavailable(String),
    #[error("Transaction {0} already broadcast")]
    AlreadyKnown(TxId),
}

/// Network collaborator accepting signed transactions
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, tx: &Transaction) -> Result<TxId, BroadcastError>;
}

// =============================================================================
// Outbox
// =============================================================================

/// One line of the outbox file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub txid: TxId,
    /// Full serialization, hex-encoded
    pub raw: String,
    pub queued_at: i64,
}

/// Appends signed transactions to a JSON-lines outbox, once per txid
pub struct OutboxBroadcaster {
    path: PathBuf,
    known: Mutex<HashSet<TxId>>,
}

impl OutboxBroadcaster {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BroadcastError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |e: std::io::Error| BroadcastError::Unavailable(e.to_string());

        let mut known = HashSet::new();
        if path.exists() {
            let file = fs::File::open(&path).map_err(unavailable)?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(unavailable)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<OutboxEntry>(&line) {
                    Ok(entry) => {
                        known.insert(entry.txid);
                    }
                    Err(e) => log::warn!("Skipping malformed outbox line: {}", e),
                }
            }
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }

        Ok(Self {
            path,
            known: Mutex::new(known),
        })
    }
}

impl Broadcaster for OutboxBroadcaster {
    fn broadcast(&self, tx: &Transaction) -> Result<TxId, BroadcastError> {
        if !tx.is_signed() {
            return Err(BroadcastError::Rejected(
                "transaction has unsigned inputs".to_string(),
            ));
        }

        let txid = tx.txid();
        let mut known = self.known.lock();
        if known.contains(&txid) {
            return Err(BroadcastError::AlreadyKnown(txid));
        }

        let entry = OutboxEntry {
            txid,
            raw: hex::encode(tx.serialize()),
            queued_at: Utc::now().timestamp(),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| BroadcastError::Rejected(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BroadcastError::Unavailable(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| BroadcastError::Unavailable(e.to_string()))?;

        known.insert(txid);
        log::info!("Queued transaction {} in outbox", txid);
        Ok(txid)
    }
}

// =============================================================================
// Recording broadcaster
// =============================================================================

/// In-memory broadcaster with programmable failure
#[derive(Default)]
pub struct RecordingBroadcaster {
    sent: Mutex<Vec<Transaction>>,
    failure: Mutex<Option<BroadcastError>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every broadcast with `error` until cleared with `None`
    pub fn set_failure(&self, error: Option<BroadcastError>) {
        *self.failure.lock() = error;
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, tx: &Transaction) -> Result<TxId, BroadcastError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let txid = tx.txid();
        let mut sent = self.sent.lock();
        if sent.iter().any(|t| t.txid() == txid) {
            return Err(BroadcastError::AlreadyKnown(txid));
        }
        sent.push(tx.clone());
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TransactionBuilder};

    fn signed_tx(n: u8) -> Transaction {
        let mut tx = TransactionBuilder::new()
            .add_input(OutPoint::new(TxId([n; 32]), 0))
            .add_output("3Recipient", 1_000)
            .build();
        tx.inputs[0].witness = vec!["00".to_string(), "51".to_string()];
        tx
    }

    #[test]
    fn test_outbox_appends_once_per_txid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox").join("tx.jsonl");
        let outbox = OutboxBroadcaster::open(&path).unwrap();

        let tx = signed_tx(1);
        assert_eq!(outbox.broadcast(&tx).unwrap(), tx.txid());
        assert_eq!(
            outbox.broadcast(&tx),
            Err(BroadcastError::AlreadyKnown(tx.txid()))
        );
        outbox.broadcast(&signed_tx(2)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: OutboxEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.raw, hex::encode(tx.serialize()));
    }

    #[test]
    fn test_outbox_remembers_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx.jsonl");
        let tx = signed_tx(3);
        OutboxBroadcaster::open(&path).unwrap().broadcast(&tx).unwrap();

        let reopened = OutboxBroadcaster::open(&path).unwrap();
        assert!(matches!(
            reopened.broadcast(&tx),
            Err(BroadcastError::AlreadyKnown(_))
        ));
    }

    #[test]
    fn test_outbox_refuses_unsigned() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxBroadcaster::open(dir.path().join("tx.jsonl")).unwrap();
        let mut tx = signed_tx(4);
        tx.inputs[0].witness.clear();
        assert!(matches!(
            outbox.broadcast(&tx),
            Err(BroadcastError::Rejected(_))
        ));
    }

    #[test]
    fn test_recording_failure_switch() {
        let recorder = RecordingBroadcaster::new();
        recorder.set_failure(Some(BroadcastError::Unavailable("offline".to_string())));
        assert!(recorder.broadcast(&signed_tx(1)).is_err());
        assert!(recorder.sent().is_empty());

        recorder.set_failure(None);
        recorder.broadcast(&signed_tx(1)).unwrap();
        assert_eq!(recorder.sent().len(), 1);
    }
}
