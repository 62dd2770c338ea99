//! In-process store
//!
//! Holds the whole service state in memory. [`StoreState`] is also the
//! snapshot format written by the JSON store.

use super::{StorageError, Store};
use crate::core::OutPoint;
use crate::multisig::Proposal;
use crate::utxo::{LockState, Utxo};
use crate::wallet::Wallet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything the service persists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub wallets: BTreeMap<String, Wallet>,
    pub proposals: BTreeMap<String, Proposal>,
    /// UTXO ledger per wallet, in insertion order
    pub utxos: BTreeMap<String, Vec<Utxo>>,
    /// Non-free lock states
    #[serde(with = "lock_entries")]
    pub locks: HashMap<OutPoint, LockState>,
}

impl StoreState {
    pub(crate) fn list_proposals(&self, wallet_id: Option<&str>) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self
            .proposals
            .values()
            .filter(|p| wallet_id.map_or(true, |w| p.wallet_id == w))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        proposals
    }

    pub(crate) fn put_utxo(&mut self, wallet_id: &str, utxo: &Utxo) {
        let ledger = self.utxos.entry(wallet_id.to_string()).or_default();
        match ledger.iter_mut().find(|u| u.outpoint == utxo.outpoint) {
            Some(existing) => *existing = utxo.clone(),
            None => ledger.push(utxo.clone()),
        }
    }

    pub(crate) fn put_locks(&mut self, locks: &[(OutPoint, LockState)]) {
        for (outpoint, state) in locks {
            if *state == LockState::Free {
                self.locks.remove(outpoint);
            } else {
                self.locks.insert(*outpoint, state.clone());
            }
        }
    }
}

/// Memory-backed [`Store`] with switchable write failures
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write<F: FnOnce(&mut StoreState)>(&self, f: F) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                "store writes disabled",
            )));
        }
        f(&mut self.state.write());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>, StorageError> {
        Ok(self.state.read().wallets.get(wallet_id).cloned())
    }

    fn put_wallet(&self, wallet: &Wallet) -> Result<(), StorageError> {
        self.write(|s| {
            s.wallets.insert(wallet.id.clone(), wallet.clone());
        })
    }

    fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError> {
        Ok(self.state.read().wallets.values().cloned().collect())
    }

    fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>, StorageError> {
        Ok(self.state.read().proposals.get(proposal_id).cloned())
    }

    fn put_proposal(&self, proposal: &Proposal) -> Result<(), StorageError> {
        self.write(|s| {
            s.proposals.insert(proposal.id.clone(), proposal.clone());
        })
    }

    fn list_proposals(&self, wallet_id: Option<&str>) -> Result<Vec<Proposal>, StorageError> {
        Ok(self.state.read().list_proposals(wallet_id))
    }

    fn get_utxos(&self, wallet_id: &str) -> Result<Vec<Utxo>, StorageError> {
        Ok(self
            .state
            .read()
            .utxos
            .get(wallet_id)
            .cloned()
            .unwrap_or_default())
    }

    fn put_utxo(&self, wallet_id: &str, utxo: &Utxo) -> Result<(), StorageError> {
        self.write(|s| s.put_utxo(wallet_id, utxo))
    }

    fn load_locks(&self) -> Result<Vec<(OutPoint, LockState)>, StorageError> {
        Ok(self
            .state
            .read()
            .locks
            .iter()
            .map(|(o, s)| (*o, s.clone()))
            .collect())
    }

    fn put_locks(&self, locks: &[(OutPoint, LockState)]) -> Result<(), StorageError> {
        self.write(|s| s.put_locks(locks))
    }
}

/// Lock table as a list of records (JSON object keys must be strings)
mod lock_entries {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct LockRecord {
        outpoint: OutPoint,
        lock: LockState,
    }

    pub fn serialize<S: Serializer>(
        locks: &HashMap<OutPoint, LockState>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut records: Vec<LockRecord> = locks
            .iter()
            .map(|(o, s)| LockRecord {
                outpoint: *o,
                lock: s.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.outpoint);
        records.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<OutPoint, LockState>, D::Error> {
        let records = Vec::<LockRecord>::deserialize(deserializer)?;
        Ok(records.into_iter().map(|r| (r.outpoint, r.lock)).collect())
    }
}
