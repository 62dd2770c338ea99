//! Wallet UTXOs
//!
//! This module provides:
//! - The UTXO record reported by the blockchain collaborator
//! - The lock table reserving UTXOs for in-flight proposals
//! - Deterministic coin selection over the free pool

pub mod lock;
pub mod selection;

use crate::core::OutPoint;
use serde::{Deserialize, Serialize};

pub use lock::{LockError, LockState, UtxoLockManager};
pub use selection::{select_utxos, InsufficientFunds, Selection};

/// An unspent output owned by one of a wallet's addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub outpoint: OutPoint,
    /// Amount in satoshis
    pub amount: u64,
    pub address: String,
    /// Derivation path of the owning address
    pub path: String,
}
