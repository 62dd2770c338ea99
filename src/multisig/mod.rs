//! Multi-signature transaction proposals
//!
//! Copayers of an M-of-N wallet propose spends, sign each input with keys
//! derived for that input's address, and the proposal is broadcast once M
//! distinct copayers have contributed valid signature sets.
//!
//! # Example
//!
//! ```ignore
//! use multisig_wallet_service::multisig::{MultisigManager, ProposalRequest};
//!
//! let draft = manager.create(ProposalRequest { wallet_id, creator_id, outputs, fee_rate, message: None })?;
//! manager.publish(&draft.id, &creator_id)?;
//!
//! // Each copayer signs every input
//! manager.submit_signatures(&draft.id, &alice, alice_sigs)?;
//! manager.submit_signatures(&draft.id, &bob, bob_sigs)?;
//!
//! // Quorum reached, hand it to the network
//! manager.broadcast(&draft.id, &alice)?;
//! ```

pub mod error;
pub mod manager;
pub mod proposal;
pub mod quorum;

pub use error::MultisigError;
pub use manager::{EngineConfig, MultisigManager, ProposalRequest, WalletBalance};
pub use proposal::{ChangeOutput, Proposal, ProposalStatus, Rejection};
pub use quorum::{assemble, evaluate, verify_set, Quorum, SigningContext};
