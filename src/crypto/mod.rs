//! Cryptographic primitives for the multisig service
//!
//! This module provides:
//! - SHA-256 / HASH160 hashing and Base58Check encoding
//! - Validated secp256k1 curve points (compression, X-only lift)
//! - ECDSA and BIP340 Schnorr verification
//! - Bound signatures exchanged between copayers

pub mod hash;
pub mod keys;
pub mod point;
pub mod signature;

pub use hash::{base58check, double_sha256, generate_id, hash160, sha256, sha256_hex};
pub use keys::{copayer_id, ecdsa_der, verify_ecdsa, verify_schnorr, KeyError};
pub use point::{CurvePoint, PointError, COMPRESSED_POINT_SIZE, UNCOMPRESSED_POINT_SIZE};
pub use signature::{BoundSignature, BoundSignatureObject, ByteField, SignatureError};
