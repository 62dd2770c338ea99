//! Service-level error taxonomy
//!
//! Every failure surfaced to callers is a [`MultisigError`] with a stable
//! machine-readable code; `Display` gives the human-readable message.

use crate::core::{ScriptError, TransactionError};
use crate::crypto::{PointError, SignatureError};
use crate::network::BroadcastError;
use crate::storage::StorageError;
use crate::utxo::{InsufficientFunds, LockError};
use crate::wallet::{AddressError, RegistryError};
use thiserror::Error;

/// Errors related to multisig operations
#[derive(Error, Debug)]
pub enum MultisigError {
    #[error("Invalid point: {0}")]
    InvalidPoint(String),
    #[error("Invalid X coordinate: {0}")]
    InvalidX(String),
    #[error("Lift failed: {0}")]
    LiftFailed(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error("Copayer {0} already voted on this proposal")]
    DuplicateVote(String),
    #[error("Insufficient funds: need {required} sat, {available} sat available")]
    InsufficientFunds { required: u64, available: u64 },
    #[error("Lock conflict: {0}")]
    LockConflict(String),
    #[error("Cannot {action} proposal {proposal_id} in state {state}")]
    InvalidStateTransition {
        proposal_id: String,
        state: String,
        action: &'static str,
    },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not authorized: {0}")]
    NotAuthorized(String),
    #[error("Wallet {0} already has all its copayers")]
    WalletFull(String),
    #[error("Wallet {0} does not have all its copayers yet")]
    WalletNotComplete(String),
    #[error("Copayer already registered: {0}")]
    CopayerExists(String),
    #[error("Broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MultisigError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            MultisigError::InvalidPoint(_) => "INVALID_POINT",
            MultisigError::InvalidX(_) => "INVALID_X",
            MultisigError::LiftFailed(_) => "LIFT_FAILED",
            MultisigError::InvalidArgument(_) => "INVALID_ARGUMENT",
            MultisigError::SignatureMismatch(_) => "SIGNATURE_MISMATCH",
            MultisigError::DuplicateVote(_) => "DUPLICATE_VOTE",
            MultisigError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            MultisigError::LockConflict(_) => "LOCK_CONFLICT",
            MultisigError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            MultisigError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            MultisigError::NotFound(_) => "NOT_FOUND",
            MultisigError::NotAuthorized(_) => "NOT_AUTHORIZED",
            MultisigError::WalletFull(_) => "WALLET_FULL",
            MultisigError::WalletNotComplete(_) => "WALLET_NOT_COMPLETE",
            MultisigError::CopayerExists(_) => "COPAYER_EXISTS",
            MultisigError::Broadcast(_) => "BROADCAST_FAILED",
            MultisigError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub(crate) fn invariant(message: String) -> Self {
        log::error!("Invariant violation: {}", message);
        MultisigError::InvariantViolation(message)
    }
}

impl From<PointError> for MultisigError {
    fn from(e: PointError) -> Self {
        match e {
            PointError::InvalidPoint(m) => MultisigError::InvalidPoint(m),
            PointError::InvalidX(m) => MultisigError::InvalidX(m),
            PointError::LiftFailed(m) => MultisigError::LiftFailed(m),
        }
    }
}

impl From<SignatureError> for MultisigError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::InvalidArgument(m) => MultisigError::InvalidArgument(m),
            SignatureError::SignatureMismatch(m) => MultisigError::SignatureMismatch(m),
            SignatureError::UnsupportedSigType(_) => MultisigError::SignatureMismatch(e.to_string()),
        }
    }
}

impl From<LockError> for MultisigError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::LockConflict { .. } => MultisigError::LockConflict(e.to_string()),
            LockError::InvariantViolation(m) => MultisigError::InvariantViolation(m),
            LockError::Storage(s) => MultisigError::Storage(s),
        }
    }
}

impl From<InsufficientFunds> for MultisigError {
    fn from(e: InsufficientFunds) -> Self {
        MultisigError::InsufficientFunds {
            required: e.required,
            available: e.available,
        }
    }
}

impl From<RegistryError> for MultisigError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidConfig(m) => MultisigError::InvalidArgument(m),
            RegistryError::NotFound(id) => MultisigError::NotFound(format!("wallet {}", id)),
            RegistryError::WalletFull(id) => MultisigError::WalletFull(id),
            RegistryError::CopayerExists(id) => MultisigError::CopayerExists(id),
            RegistryError::WalletNotComplete(id) => MultisigError::WalletNotComplete(id),
            RegistryError::UnknownAddress { .. } => MultisigError::InvalidArgument(e.to_string()),
            RegistryError::Address(a) => a.into(),
            RegistryError::Storage(s) => MultisigError::Storage(s),
        }
    }
}

impl From<AddressError> for MultisigError {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::WalletNotComplete(id) => MultisigError::WalletNotComplete(id),
            AddressError::Script(s) => MultisigError::InvalidArgument(s.to_string()),
            AddressError::Derivation { .. } => MultisigError::InvalidArgument(e.to_string()),
        }
    }
}

impl From<ScriptError> for MultisigError {
    fn from(e: ScriptError) -> Self {
        MultisigError::InvalidArgument(e.to_string())
    }
}

impl From<TransactionError> for MultisigError {
    fn from(e: TransactionError) -> Self {
        MultisigError::invariant(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TxId};
    use crate::utxo::LockState;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            MultisigError::from(PointError::LiftFailed("x".into())).code(),
            "LIFT_FAILED"
        );
        assert_eq!(
            MultisigError::from(SignatureError::UnsupportedSigType(3)).code(),
            "SIGNATURE_MISMATCH"
        );
        assert_eq!(
            MultisigError::from(LockError::LockConflict {
                outpoint: OutPoint::new(TxId([0; 32]), 0),
                state: LockState::Spent,
            })
            .code(),
            "LOCK_CONFLICT"
        );
        assert_eq!(
            MultisigError::from(RegistryError::NotFound("w".into())).code(),
            "NOT_FOUND"
        );
        assert_eq!(
            MultisigError::from(InsufficientFunds {
                required: 2,
                available: 1
            })
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_messages_are_readable() {
        let err = MultisigError::InvalidStateTransition {
            proposal_id: "abc".into(),
            state: "signed".into(),
            action: "reject",
        };
        assert_eq!(err.to_string(), "Cannot reject proposal abc in state signed");
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }
}
