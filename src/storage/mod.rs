//! Storage contract and adapters
//!
//! The engine needs only atomic per-call writes from its store; the
//! adapters here keep everything in memory or in a JSON snapshot file.

pub mod memory;
pub mod persistence;

use crate::core::OutPoint;
use crate::multisig::Proposal;
use crate::utxo::{LockState, Utxo};
use crate::wallet::Wallet;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use memory::{MemoryStore, StoreState};
pub use persistence::{JsonStore, StorageConfig, LOCK_FILE};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Data directory is in use by process {holder} (lock file {path:?})")]
    DirectoryLocked { path: PathBuf, holder: String },
}

/// Load/save contract for wallets, proposals, the UTXO ledger and lock states
pub trait Store: Send + Sync {
    fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>, StorageError>;
    fn put_wallet(&self, wallet: &Wallet) -> Result<(), StorageError>;
    fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError>;

    fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>, StorageError>;
    fn put_proposal(&self, proposal: &Proposal) -> Result<(), StorageError>;
    /// Proposals oldest first, optionally for one wallet
    fn list_proposals(&self, wallet_id: Option<&str>) -> Result<Vec<Proposal>, StorageError>;

    /// A wallet's UTXOs in the order they were reported
    fn get_utxos(&self, wallet_id: &str) -> Result<Vec<Utxo>, StorageError>;
    /// Add a UTXO, or replace the entry with the same outpoint
    fn put_utxo(&self, wallet_id: &str, utxo: &Utxo) -> Result<(), StorageError>;

    /// Every non-free lock state
    fn load_locks(&self) -> Result<Vec<(OutPoint, LockState)>, StorageError>;
    /// Write a batch of lock states atomically; `Free` deletes the entry
    fn put_locks(&self, locks: &[(OutPoint, LockState)]) -> Result<(), StorageError>;
}
