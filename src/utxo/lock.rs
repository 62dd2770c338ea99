//! UTXO lock table
//!
//! One table maps every known outpoint to its lock state; a missing entry is
//! `Free`. Every batch operation checks all references and applies all
//! updates under a single mutex, persisting the batch before the in-memory
//! table changes, so no caller ever observes a partially locked batch.

use crate::core::OutPoint;
use crate::storage::{Store, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lock state of one UTXO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "proposalId", rename_all = "lowercase")]
pub enum LockState {
    Free,
    Locked(String),
    Spent,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Free => write!(f, "free"),
            LockState::Locked(id) => write!(f, "locked by {}", id),
            LockState::Spent => write!(f, "spent"),
        }
    }
}

/// Lock table errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("UTXO {outpoint} is {state}")]
    LockConflict { outpoint: OutPoint, state: LockState },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Reserves UTXOs for proposals with all-or-nothing batch semantics
pub struct UtxoLockManager {
    table: Mutex<HashMap<OutPoint, LockState>>,
    store: Arc<dyn Store>,
}

impl UtxoLockManager {
    /// Create a manager over the lock states persisted in `store`
    pub fn load(store: Arc<dyn Store>) -> Result<Self, LockError> {
        let table = store
            .load_locks()?
            .into_iter()
            .filter(|(_, state)| *state != LockState::Free)
            .collect();
        Ok(Self {
            table: Mutex::new(table),
            store,
        })
    }

    /// Lock every reference to `proposal_id`, or none of them
    pub fn lock(&self, refs: &[OutPoint], proposal_id: &str) -> Result<(), LockError> {
        check_distinct(refs)?;
        let mut table = self.table.lock();

        for outpoint in refs {
            if let Some(state) = table.get(outpoint) {
                log::warn!(
                    "Lock conflict for proposal {}: {} is {}",
                    proposal_id,
                    outpoint,
                    state
                );
                return Err(LockError::LockConflict {
                    outpoint: *outpoint,
                    state: state.clone(),
                });
            }
        }

        let locked = LockState::Locked(proposal_id.to_string());
        let updates: Vec<_> = refs.iter().map(|o| (*o, locked.clone())).collect();
        self.commit(&mut table, updates)?;

        log::debug!("Locked {} UTXOs to proposal {}", refs.len(), proposal_id);
        Ok(())
    }

    /// Return references held by `proposal_id` to the free pool
    ///
    /// Already-free references are skipped. Releasing a reference held by
    /// another proposal, or one already spent, is an invariant violation.
    pub fn release(&self, refs: &[OutPoint], proposal_id: &str) -> Result<(), LockError> {
        check_distinct(refs)?;
        let mut table = self.table.lock();

        let mut updates = Vec::with_capacity(refs.len());
        for outpoint in refs {
            match table.get(outpoint) {
                None => {}
                Some(LockState::Locked(owner)) if owner == proposal_id => {
                    updates.push((*outpoint, LockState::Free));
                }
                Some(state) => {
                    return Err(violation(format!(
                        "proposal {} cannot release {}: {}",
                        proposal_id, outpoint, state
                    )));
                }
            }
        }

        self.commit(&mut table, updates)?;
        log::debug!("Released UTXOs of proposal {}", proposal_id);
        Ok(())
    }

    /// Mark references locked by `proposal_id` as spent (irreversible)
    pub fn mark_spent(&self, refs: &[OutPoint], proposal_id: &str) -> Result<(), LockError> {
        check_distinct(refs)?;
        let mut table = self.table.lock();

        for outpoint in refs {
            match table.get(outpoint) {
                Some(LockState::Locked(owner)) if owner == proposal_id => {}
                other => {
                    return Err(violation(format!(
                        "proposal {} cannot spend {}: {}",
                        proposal_id,
                        outpoint,
                        other.cloned().unwrap_or(LockState::Free)
                    )));
                }
            }
        }

        let updates = refs.iter().map(|o| (*o, LockState::Spent)).collect();
        self.commit(&mut table, updates)?;
        log::info!("Marked {} UTXOs spent by proposal {}", refs.len(), proposal_id);
        Ok(())
    }

    pub fn state(&self, outpoint: &OutPoint) -> LockState {
        self.table
            .lock()
            .get(outpoint)
            .cloned()
            .unwrap_or(LockState::Free)
    }

    pub fn is_free(&self, outpoint: &OutPoint) -> bool {
        !self.table.lock().contains_key(outpoint)
    }

    /// Persist a batch, then apply it; the table is untouched if persisting fails
    fn commit(
        &self,
        table: &mut HashMap<OutPoint, LockState>,
        updates: Vec<(OutPoint, LockState)>,
    ) -> Result<(), LockError> {
        if updates.is_empty() {
            return Ok(());
        }
        self.store.put_locks(&updates)?;
        for (outpoint, state) in updates {
            if state == LockState::Free {
                table.remove(&outpoint);
            } else {
                table.insert(outpoint, state);
            }
        }
        Ok(())
    }
}

fn check_distinct(refs: &[OutPoint]) -> Result<(), LockError> {
    let mut seen = HashSet::with_capacity(refs.len());
    match refs.iter().find(|o| !seen.insert(**o)) {
        Some(dup) => Err(violation(format!("{} listed twice in one batch", dup))),
        None => Ok(()),
    }
}

fn violation(message: String) -> LockError {
    log::error!("UTXO lock invariant violated: {}", message);
    LockError::InvariantViolation(message)
}
