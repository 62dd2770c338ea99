//! JSON persistence layer
//!
//! Keeps the service state in memory and writes a full JSON snapshot on
//! every change: temp file first, then an atomic rename, with rotating
//! backups of the previous snapshot.
//!
//! The snapshot is only read at open, so a data directory belongs to one
//! store at a time. Opening claims it through a lock file holding the
//! owner's process id; the file is removed when the store is dropped. A
//! process that dies without dropping its store leaves the file behind, and
//! it must be deleted by hand once that process is known to be gone.

use super::memory::StoreState;
use super::{StorageError, Store};
use crate::core::OutPoint;
use crate::multisig::Proposal;
use crate::utxo::{LockState, Utxo};
use crate::wallet::Wallet;
use parking_lot::RwLock;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File marking a data directory as owned by an open store
pub const LOCK_FILE: &str = "LOCK";

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub state_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wallet_service_data"),
            state_file: "state.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// Exclusive claim on a data directory, released on drop
#[derive(Debug)]
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(data_dir: &Path) -> Result<Self, StorageError> {
        let path = data_dir.join(LOCK_FILE);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let claimed = writeln!(file, "{}", std::process::id()).and_then(|_| file.flush());
                let lock = Self { path };
                claimed?;
                Ok(lock)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                Err(StorageError::DirectoryLocked {
                    path,
                    holder: holder.trim().to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Snapshot-file backed [`Store`]
pub struct JsonStore {
    config: StorageConfig,
    state: RwLock<StoreState>,
    _lock: DirLock,
}

impl JsonStore {
    /// Open the store, loading the last snapshot if there is one
    ///
    /// Fails with [`StorageError::DirectoryLocked`] while another store has
    /// the same data directory open.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        let lock = DirLock::acquire(&config.data_dir)?;
        let path = config.data_dir.join(&config.state_file);
        let state = if path.exists() {
            let file = fs::File::open(&path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            StoreState::default()
        };

        log::info!(
            "Opened store at {} ({} wallets, {} proposals)",
            path.display(),
            state.wallets.len(),
            state.proposals.len()
        );
        Ok(Self {
            config,
            state: RwLock::new(state),
            _lock: lock,
        })
    }

    /// Open with default configuration
    pub fn with_defaults() -> Result<Self, StorageError> {
        Self::open(StorageConfig::default())
    }

    /// Get the snapshot file path
    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.state_file)
    }

    /// Get a backup file path
    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.state_file, index))
    }

    /// Apply a change to a copy of the state, persist it, then publish it
    fn write<F: FnOnce(&mut StoreState)>(&self, f: F) -> Result<(), StorageError> {
        let mut state = self.state.write();
        let mut next = state.clone();
        f(&mut next);
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    fn save(&self, state: &StoreState) -> Result<(), StorageError> {
        let path = self.state_path();

        // Create backup if enabled
        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to temporary file first
        let temp_path = self.config.data_dir.join(format!("{}.tmp", self.config.state_file));
        let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Rotate backup files
    fn rotate_backups(&self) -> Result<(), StorageError> {
        // Delete oldest backup
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        // Shift existing backups
        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }

    /// Replace the current state with a backup and persist it
    pub fn restore_backup(&self, backup_index: usize) -> Result<(), StorageError> {
        let backup_path = self.backup_path(backup_index);
        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }

        let file = fs::File::open(&backup_path)?;
        let restored: StoreState = serde_json::from_reader(BufReader::new(file))?;
        log::warn!("Restoring store from backup {}", backup_index);
        self.write(|s| *s = restored)
    }
}

impl Store for JsonStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SignatureScheme, TxId};

    fn config(dir: &std::path::Path) -> StorageConfig {
        StorageConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::new("savings", 2, 3, SignatureScheme::Ecdsa, 15).unwrap();
        let op = OutPoint::new(TxId([4; 32]), 2);

        {
            let store = JsonStore::open(config(temp_dir.path())).unwrap();
            store.put_wallet(&wallet).unwrap();
            store
                .put_locks(&[(op, LockState::Locked("p".to_string()))])
                .unwrap();
        }

        let store = JsonStore::open(config(temp_dir.path())).unwrap();
        assert_eq!(store.get_wallet(&wallet.id).unwrap(), Some(wallet));
        assert_eq!(
            store.load_locks().unwrap(),
            vec![(op, LockState::Locked("p".to_string()))]
        );
    }

    #[test]
    fn test_backup_rotation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(StorageConfig {
            max_backups: 3,
            ..config(temp_dir.path())
        })
        .unwrap();

        // Save multiple times
        for i in 0..5 {
            let wallet =
                Wallet::new(&format!("w{}", i), 1, 1, SignatureScheme::Ecdsa, 15).unwrap();
            store.put_wallet(&wallet).unwrap();
        }

        // Should have 3 backups (max)
        assert_eq!(store.list_backups(), vec![0, 1, 2]);
    }

    #[test]
    fn test_restore_backup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(config(temp_dir.path())).unwrap();
        let first = Wallet::new("first", 1, 1, SignatureScheme::Ecdsa, 15).unwrap();
        let second = Wallet::new("second", 1, 1, SignatureScheme::Ecdsa, 15).unwrap();
        store.put_wallet(&first).unwrap();
        store.put_wallet(&second).unwrap();

        // Backup 0 holds the snapshot from before the second write
        store.restore_backup(0).unwrap();
        assert!(store.get_wallet(&first.id).unwrap().is_some());
        assert!(store.get_wallet(&second.id).unwrap().is_none());
        assert!(store.restore_backup(9).is_err());
    }

    #[test]
    fn test_data_dir_has_one_owner() {
        let temp_dir = tempfile::tempdir().unwrap();
        let server = JsonStore::open(config(temp_dir.path())).unwrap();
        let holder = fs::read_to_string(temp_dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());

        match JsonStore::open(config(temp_dir.path())) {
            Err(StorageError::DirectoryLocked { holder, .. }) => {
                assert_eq!(holder, std::process::id().to_string())
            }
            other => panic!("second open should fail, got {:?}", other.err()),
        }

        let wallet = Wallet::new("first", 1, 1, SignatureScheme::Ecdsa, 15).unwrap();
        server.put_wallet(&wallet).unwrap();
        drop(server);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());

        let reopened = JsonStore::open(config(temp_dir.path())).unwrap();
        assert!(reopened.get_wallet(&wallet.id).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("state.json"), b"{ not json").unwrap();
        assert!(matches!(
            JsonStore::open(config(temp_dir.path())),
            Err(StorageError::SerializationError(_))
        ));
        // A failed open gives the directory back
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }
}
