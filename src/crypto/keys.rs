//! Signature verification over secp256k1
//!
//! Only public keys and signatures ever reach the service; signing happens on
//! the copayers' devices. ECDSA signatures are accepted in compact (64-byte)
//! or DER form, Schnorr signatures in the 64-byte BIP340 form.

use secp256k1::{ecdsa, schnorr, Message, Secp256k1};
use thiserror::Error;

use super::hash::sha256_hex;
use super::point::CurvePoint;

/// Errors that can occur while decoding signatures or messages
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Message digest must be 32 bytes")]
    InvalidDigest,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// Verify an ECDSA signature over a 32-byte digest
pub fn verify_ecdsa(
    public_key: &CurvePoint,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidDigest)?;

    let sig = if signature.len() == 64 {
        ecdsa::Signature::from_compact(signature)
    } else {
        ecdsa::Signature::from_der(signature)
    }
    .map_err(|_| KeyError::InvalidSignature)?;

    match secp.verify_ecdsa(&message, &sig, public_key.as_public_key()) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Verify a BIP340 Schnorr signature over a 32-byte digest
///
/// The key is used X-only, so either parity of the same X verifies.
pub fn verify_schnorr(
    public_key: &CurvePoint,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidDigest)?;
    let sig = schnorr::Signature::from_slice(signature).map_err(|_| KeyError::InvalidSignature)?;

    match secp.verify_schnorr(&sig, &message, &public_key.x_only()) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// DER encoding of an ECDSA signature given in compact or DER form
pub fn ecdsa_der(signature: &[u8]) -> Result<Vec<u8>, KeyError> {
    let sig = if signature.len() == 64 {
        ecdsa::Signature::from_compact(signature)
    } else {
        ecdsa::Signature::from_der(signature)
    }
    .map_err(|_| KeyError::InvalidSignature)?;
    Ok(sig.serialize_der().to_vec())
}

/// Stable copayer identifier: hex SHA-256 of the compressed public key
pub fn copayer_id(public_key: &CurvePoint) -> String {
    sha256_hex(&public_key.to_compressed())
}
