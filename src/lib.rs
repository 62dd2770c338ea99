//! Multisig Wallet Service: transaction proposals for M-of-N wallets
//!
//! This crate provides the core of a multi-copayer wallet service:
//! - Validated secp256k1 points with X-only lifting
//! - Signatures bound to one input of one proposal (ECDSA and BIP340 Schnorr)
//! - Wallet and copayer registry with per-address key derivation
//! - Atomic UTXO locking so no output is ever promised to two proposals
//! - Proposal lifecycle (draft, pending, signed, broadcast, rejected, expired, removed)
//! - Quorum verification and signed transaction assembly
//! - JSON persistence and a REST API
//!
//! # Example
//!
//! ```rust
//! use multisig_wallet_service::core::SignatureScheme;
//! use multisig_wallet_service::multisig::{EngineConfig, MultisigManager};
//! use multisig_wallet_service::network::RecordingBroadcaster;
//! use multisig_wallet_service::storage::MemoryStore;
//! use multisig_wallet_service::wallet::AdditiveDeriver;
//! use std::sync::Arc;
//!
//! let manager = MultisigManager::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RecordingBroadcaster::new()),
//!     Arc::new(AdditiveDeriver),
//!     EngineConfig::default(),
//! )
//! .unwrap();
//!
//! // Create a 2-of-3 wallet; copayers join with their public keys
//! let wallet = manager
//!     .register_wallet("treasury", 2, 3, SignatureScheme::Ecdsa)
//!     .unwrap();
//! println!("Wallet: {} ({})", wallet.id, wallet.description());
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod multisig;
pub mod network;
pub mod storage;
pub mod utxo;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{FeeRate, OutPoint, SignatureScheme, Transaction, TxId, TxOutput};
pub use crypto::{BoundSignature, CurvePoint};
pub use multisig::{
    EngineConfig, MultisigError, MultisigManager, Proposal, ProposalRequest, ProposalStatus,
};
pub use network::{Broadcaster, OutboxBroadcaster};
pub use storage::{JsonStore, MemoryStore, Store};
pub use utxo::{LockState, UtxoLockManager};
pub use wallet::{KeyDeriver, Wallet, WalletRegistry};
