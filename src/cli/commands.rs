//! CLI commands for the wallet service
//!
//! Implements the operator-side command handlers; copayer actions go
//! through the REST API. Opening [`AppState`] claims the data directory, so
//! these commands fail fast while a server holds it.

use crate::multisig::{EngineConfig, MultisigManager, ProposalStatus};
use crate::network::OutboxBroadcaster;
use crate::storage::{JsonStore, StorageConfig};
use crate::wallet::AdditiveDeriver;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// File the outbox broadcaster appends signed transactions to
pub const OUTBOX_FILE: &str = "outbox.jsonl";

/// Application state
pub struct AppState {
    pub manager: Arc<MultisigManager>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the persisted service state under `data_dir`
    pub fn new(data_dir: PathBuf, config: EngineConfig) -> CliResult<Self> {
        let storage_config = StorageConfig {
            data_dir: data_dir.clone(),
            ..Default::default()
        };
        let store = Arc::new(JsonStore::open(storage_config)?);
        let broadcaster = Arc::new(OutboxBroadcaster::open(data_dir.join(OUTBOX_FILE))?);

        let manager = MultisigManager::new(store, broadcaster, Arc::new(AdditiveDeriver), config)?;
        log::info!("Opened wallet service state in {:?}", data_dir);

        Ok(Self {
            manager: Arc::new(manager),
            data_dir,
        })
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join(OUTBOX_FILE)
    }
}

/// Expire stale proposals once
///
/// For offline use; a running server sweeps on its own schedule.
pub fn cmd_sweep(state: &AppState) -> CliResult<()> {
    let expired = state.manager.expire_stale(Utc::now())?;

    if expired.is_empty() {
        println!("✅ No stale proposals");
    } else {
        println!("⏰ Expired {} proposal(s):", expired.len());
        for id in expired {
            println!("   {}", id);
        }
    }
    Ok(())
}

/// List proposals, optionally filtered by wallet and status
pub fn cmd_proposals(
    state: &AppState,
    wallet_id: Option<&str>,
    status: Option<&str>,
) -> CliResult<()> {
    let status = status.map(str::parse::<ProposalStatus>).transpose()?;
    let proposals = state.manager.list_all(wallet_id, status)?;

    if proposals.is_empty() {
        println!("📭 No proposals found.");
        return Ok(());
    }

    println!("📋 Proposals ({}):", proposals.len());
    for p in proposals {
        println!(
            "   {} [{}] wallet {} - {} sat out, fee {} sat, {}/{} signatures",
            p.id,
            p.status,
            p.wallet_id,
            p.total_output(),
            p.fee,
            p.signatures.len(),
            p.required_signatures
        );
        if let Some(txid) = p.txid {
            println!("   └─ txid: {}", txid);
        }
    }
    Ok(())
}

/// Show a wallet's copayers, addresses and balance
pub fn cmd_wallet(state: &AppState, wallet_id: &str) -> CliResult<()> {
    let wallet = state.manager.get_wallet(wallet_id)?;
    let balance = state.manager.balance(wallet_id)?;

    println!("🔐 Wallet {} ({})", wallet.id, wallet.name);
    println!("   Policy: {} {:?}", wallet.description(), wallet.scheme);
    println!(
        "   Copayers: {}/{}{}",
        wallet.copayers.len(),
        wallet.n,
        if wallet.is_complete() { "" } else { " (waiting for copayers)" }
    );
    for copayer in &wallet.copayers {
        println!("   ├─ {} {}", copayer.id, copayer.name);
    }

    println!("\n💰 Balance");
    println!("   Total: {} sat", balance.total);
    println!("   Available: {} sat", balance.available);
    println!("   Locked by proposals: {} sat", balance.locked);

    if !wallet.addresses.is_empty() {
        println!("\n📍 Addresses:");
        for addr in wallet.addresses.iter().take(10) {
            let kind = if addr.is_change { "change" } else { "receive" };
            println!("   {} {} ({})", addr.path, addr.address, kind);
        }
        if wallet.addresses.len() > 10 {
            println!("   ... and {} more", wallet.addresses.len() - 10);
        }
    }
    Ok(())
}

/// Whether a data directory already holds service state
pub fn has_state(data_dir: &Path) -> bool {
    data_dir.join(StorageConfig::default().state_file).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignatureScheme;
    use tempfile::tempdir;

    #[test]
    fn test_state_reopens_from_disk() {
        let dir = tempdir().unwrap();
        let wallet_id = {
            let state = AppState::new(dir.path().to_path_buf(), EngineConfig::default()).unwrap();
            let wallet = state
                .manager
                .register_wallet("treasury", 2, 3, SignatureScheme::Ecdsa)
                .unwrap();
            wallet.id
        };

        assert!(has_state(dir.path()));
        let state = AppState::new(dir.path().to_path_buf(), EngineConfig::default()).unwrap();
        assert_eq!(state.manager.get_wallet(&wallet_id).unwrap().m, 2);
        assert!(cmd_wallet(&state, &wallet_id).is_ok());
        assert!(cmd_wallet(&state, "missing").is_err());
    }

    #[test]
    fn test_second_process_state_is_refused() {
        let dir = tempdir().unwrap();
        let server = AppState::new(dir.path().to_path_buf(), EngineConfig::default()).unwrap();
        assert!(AppState::new(dir.path().to_path_buf(), EngineConfig::default()).is_err());

        drop(server);
        let state = AppState::new(dir.path().to_path_buf(), EngineConfig::default()).unwrap();
        assert!(cmd_sweep(&state).is_ok());
    }

    #[test]
    fn test_commands_on_empty_state() {
        let dir = tempdir().unwrap();
        let state = AppState::new(dir.path().to_path_buf(), EngineConfig::default()).unwrap();

        assert!(cmd_sweep(&state).is_ok());
        assert!(cmd_proposals(&state, None, Some("pending")).is_ok());
        assert!(cmd_proposals(&state, None, Some("bogus")).is_err());
        assert_eq!(state.outbox_path(), dir.path().join(OUTBOX_FILE));
    }
}
