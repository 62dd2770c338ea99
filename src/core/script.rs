//! Spend scripts and signature hash types
//!
//! Wallet outputs are locked by an M-of-N script over the copayers' derived
//! keys. ECDSA wallets use the classic sorted-key `OP_CHECKMULTISIG` redeem
//! script; Schnorr wallets use `OP_CHECKSIG`/`OP_CHECKSIGADD` over X-only keys.

use crate::crypto::{base58check, hash160, CurvePoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Script Constants
// =============================================================================

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKSIGADD: u8 = 0xba;

/// Largest key count a single small-integer opcode can express
pub const MAX_SCRIPT_KEYS: usize = 16;

/// Base58 version byte for ECDSA multisig (P2SH) addresses
pub const P2SH_VERSION: u8 = 0x05;

/// Base58 version byte for Schnorr threshold script addresses
pub const SCHNORR_SCRIPT_VERSION: u8 = 0x06;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid threshold: {threshold}-of-{total}")]
    InvalidThreshold { threshold: u8, total: usize },
    #[error("Too many keys for one script: {0}")]
    TooManyKeys(usize),
    #[error("Duplicate key in script")]
    DuplicateKey,
}

// =============================================================================
// Signature Hash Types
// =============================================================================

/// Signature hash type determines what parts of the transaction are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SigHashType {
    /// BIP341 default: commits to everything, Schnorr only
    Default = 0x00,
    /// Sign all inputs and all outputs
    All = 0x01,
    /// Sign all inputs but no outputs
    None = 0x02,
    /// Sign all inputs and only the output with same index
    Single = 0x03,
    /// SIGHASH_ALL | SIGHASH_ANYONECANPAY
    AllAnyoneCanPay = 0x81,
    /// SIGHASH_NONE | SIGHASH_ANYONECANPAY
    NoneAnyoneCanPay = 0x82,
    /// SIGHASH_SINGLE | SIGHASH_ANYONECANPAY
    SingleAnyoneCanPay = 0x83,
}

impl SigHashType {
    /// Parse a numeric sigType tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x00 => Some(SigHashType::Default),
            0x01 => Some(SigHashType::All),
            0x02 => Some(SigHashType::None),
            0x03 => Some(SigHashType::Single),
            0x81 => Some(SigHashType::AllAnyoneCanPay),
            0x82 => Some(SigHashType::NoneAnyoneCanPay),
            0x83 => Some(SigHashType::SingleAnyoneCanPay),
            _ => None,
        }
    }

    pub fn tag(&self) -> u32 {
        *self as u32
    }

    /// Check if this sighash includes ANYONECANPAY flag
    pub fn is_anyone_can_pay(&self) -> bool {
        (*self as u8) & 0x80 != 0
    }

    /// The signature scheme this flavor is produced with, if the service
    /// supports it at all. Only whole-transaction commitments are accepted.
    pub fn scheme(&self) -> Option<SignatureScheme> {
        match self {
            SigHashType::All => Some(SignatureScheme::Ecdsa),
            SigHashType::Default => Some(SignatureScheme::Schnorr),
            _ => None,
        }
    }
}

/// Signature scheme a wallet is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    #[default]
    Ecdsa,
    Schnorr,
}

impl SignatureScheme {
    /// The only sigType tag accepted from copayers of a wallet using this scheme
    pub fn sig_hash_type(&self) -> SigHashType {
        match self {
            SignatureScheme::Ecdsa => SigHashType::All,
            SignatureScheme::Schnorr => SigHashType::Default,
        }
    }

    pub fn accepts(&self, tag: u32) -> bool {
        SigHashType::from_tag(tag).and_then(|t| t.scheme()) == Some(*self)
    }
}

// =============================================================================
// Spend Script
// =============================================================================

/// M-of-N locking script over a set of (derived) copayer keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendScript {
    pub scheme: SignatureScheme,
    pub threshold: u8,
    /// Keys in script order (sorted by their serialized form)
    pub keys: Vec<CurvePoint>,
    /// Raw script bytes
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
}

impl SpendScript {
    pub fn new(
        scheme: SignatureScheme,
        threshold: u8,
        keys: Vec<CurvePoint>,
    ) -> Result<Self, ScriptError> {
        let total = keys.len();
        if threshold == 0 || threshold as usize > total {
            return Err(ScriptError::InvalidThreshold { threshold, total });
        }
        if total > MAX_SCRIPT_KEYS {
            return Err(ScriptError::TooManyKeys(total));
        }

        let mut keys = keys;
        match scheme {
            SignatureScheme::Ecdsa => keys.sort_by_key(|k| k.to_compressed()),
            SignatureScheme::Schnorr => keys.sort_by_key(|k| k.x()),
        }
        let duplicate = keys.windows(2).any(|w| match scheme {
            SignatureScheme::Ecdsa => w[0] == w[1],
            SignatureScheme::Schnorr => w[0].x() == w[1].x(),
        });
        if duplicate {
            return Err(ScriptError::DuplicateKey);
        }

        let script = match scheme {
            SignatureScheme::Ecdsa => checkmultisig_script(threshold, &keys),
            SignatureScheme::Schnorr => checksigadd_script(threshold, &keys),
        };

        Ok(Self {
            scheme,
            threshold,
            keys,
            script,
        })
    }

    /// Base58Check script-hash address
    pub fn address(&self) -> String {
        let version = match self.scheme {
            SignatureScheme::Ecdsa => P2SH_VERSION,
            SignatureScheme::Schnorr => SCHNORR_SCRIPT_VERSION,
        };
        base58check(version, &hash160(&self.script))
    }

    /// Position of a key in script order
    pub fn key_position(&self, key: &CurvePoint) -> Option<usize> {
        match self.scheme {
            SignatureScheme::Ecdsa => self.keys.iter().position(|k| k == key),
            SignatureScheme::Schnorr => self.keys.iter().position(|k| k.x() == key.x()),
        }
    }

    /// Estimated virtual size of one input spending this script
    pub fn input_vsize(&self) -> usize {
        estimate_input_vsize(self.scheme, self.threshold, self.keys.len())
    }
}

/// Estimated input vsize for an M-of-N spend without building the script
pub fn estimate_input_vsize(scheme: SignatureScheme, threshold: u8, total: usize) -> usize {
    let m = threshold as usize;
    match scheme {
        // outpoint + sequence + scriptSig(OP_0, M sigs, redeem script)
        SignatureScheme::Ecdsa => 36 + 4 + 3 + 1 + m * 74 + 2 + 3 + total * 34,
        // witness bytes count a quarter
        SignatureScheme::Schnorr => {
            let witness = m * 65 + (total - m.min(total)) + total * 34 + 2 + 33;
            36 + 4 + 1 + witness.div_ceil(4)
        }
    }
}

fn small_int(n: usize) -> u8 {
    debug_assert!((1..=MAX_SCRIPT_KEYS).contains(&n));
    OP_1 + (n as u8 - 1)
}

fn checkmultisig_script(threshold: u8, keys: &[CurvePoint]) -> Vec<u8> {
    let mut script = Vec::with_capacity(3 + keys.len() * 34);
    script.push(small_int(threshold as usize));
    for key in keys {
        script.push(33);
        script.extend_from_slice(&key.to_compressed());
    }
    script.push(small_int(keys.len()));
    script.push(OP_CHECKMULTISIG);
    script
}

fn checksigadd_script(threshold: u8, keys: &[CurvePoint]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + keys.len() * 34);
    for (i, key) in keys.iter().enumerate() {
        script.push(32);
        script.extend_from_slice(&key.x());
        script.push(if i == 0 { OP_CHECKSIG } else { OP_CHECKSIGADD });
    }
    script.push(small_int(threshold as usize));
    script.push(OP_NUMEQUAL);
    script
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
