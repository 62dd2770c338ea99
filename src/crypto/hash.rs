//! Hashing utilities
//!
//! SHA-256 based digests used for transaction ids, signature hashes,
//! copayer identifiers and script hashes.

use chrono::Utc;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
/// Used for transaction ids and signature hashes
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// RIPEMD160(SHA256(data)), the 20-byte script/key hash used in addresses
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().into()
}

/// Base58Check encoding: version || payload || first 4 bytes of double SHA-256
pub fn base58check(version: u8, payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(payload.len() + 5);
    bytes.push(version);
    bytes.extend_from_slice(payload);
    let checksum = double_sha256(&bytes);
    bytes.extend_from_slice(&checksum[..4]);
    bs58::encode(bytes).into_string()
}

/// Fresh 32-hex-character identifier derived from `seed`, the clock and a
/// process-wide counter
pub fn generate_id(seed: &str) -> String {
    let data = format!(
        "{}:{}:{}",
        seed,
        Utc::now().timestamp_nanos_opt().unwrap_or(0),
        ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    hex::encode(&sha256(data.as_bytes())[..16])
}
