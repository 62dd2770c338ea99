//! Bound signatures
//!
//! A [`BoundSignature`] ties raw signature bytes to the key that produced them
//! and to one input of one proposal (`inputIndex` plus the spent outpoint).
//! It is what copayers submit, what proposals store, and what the quorum
//! verifier re-checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::keys::{verify_ecdsa, verify_schnorr, KeyError};
use super::point::CurvePoint;
use crate::core::{OutPoint, SigHashType, TxId};

/// Errors produced while building or verifying bound signatures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error("Unsupported sigType: {0:#04x}")]
    UnsupportedSigType(u32),
}

/// A signature bound to one key, one previous output and one input position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BoundSignatureObject", into = "BoundSignatureObject")]
pub struct BoundSignature {
    public_key: CurvePoint,
    prev_tx_id: TxId,
    output_index: u32,
    input_index: u32,
    signature: Vec<u8>,
    sig_type: u32,
}

impl BoundSignature {
    pub fn new(
        public_key: CurvePoint,
        prev_tx_id: TxId,
        output_index: u32,
        input_index: u32,
        signature: Vec<u8>,
        sig_type: u32,
    ) -> Result<Self, SignatureError> {
        if signature.is_empty() {
            return Err(SignatureError::InvalidArgument(
                "signature is empty".to_string(),
            ));
        }
        Ok(Self {
            public_key,
            prev_tx_id,
            output_index,
            input_index,
            signature,
            sig_type,
        })
    }

    /// Build from the canonical object form, validating every field
    pub fn from_object(object: BoundSignatureObject) -> Result<Self, SignatureError> {
        let public_key = required("publicKey", object.public_key)?.decode("publicKey")?;
        let public_key = CurvePoint::from_slice(&public_key)
            .map_err(|e| SignatureError::InvalidArgument(format!("publicKey: {}", e)))?;

        let prev_tx_id = required("prevTxId", object.prev_tx_id)?.decode("prevTxId")?;
        let prev_tx_id = TxId::from_slice(&prev_tx_id)
            .map_err(|e| SignatureError::InvalidArgument(format!("prevTxId: {}", e)))?;

        let output_index = index_field("outputIndex", object.output_index)?;
        let input_index = index_field("inputIndex", object.input_index)?;
        let sig_type = index_field("sigType", object.sig_type)?;
        let signature = required("signature", object.signature)?.decode("signature")?;

        Self::new(
            public_key,
            prev_tx_id,
            output_index,
            input_index,
            signature,
            sig_type,
        )
    }

    /// Canonical object form with hex-encoded binary fields
    pub fn to_object(&self) -> BoundSignatureObject {
        BoundSignatureObject {
            public_key: Some(ByteField::Hex(self.public_key.to_hex())),
            prev_tx_id: Some(ByteField::Hex(self.prev_tx_id.to_hex())),
            output_index: Some(Value::from(self.output_index)),
            input_index: Some(Value::from(self.input_index)),
            signature: Some(ByteField::Hex(hex::encode(&self.signature))),
            sig_type: Some(Value::from(self.sig_type)),
        }
    }

    pub fn public_key(&self) -> &CurvePoint {
        &self.public_key
    }

    pub fn prev_tx_id(&self) -> &TxId {
        &self.prev_tx_id
    }

    pub fn output_index(&self) -> u32 {
        self.output_index
    }

    pub fn input_index(&self) -> u32 {
        self.input_index
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn sig_type(&self) -> u32 {
        self.sig_type
    }

    /// The previous output this signature claims to spend
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_tx_id, self.output_index)
    }

    /// Verify over `message` for the given input position and previous tx
    ///
    /// The binding check runs first: a signature presented for any other
    /// `(inputIndex, prevTxId)` pair fails with `SignatureMismatch` before any
    /// curve arithmetic. A signature whose bytes cannot be decoded verifies as
    /// `false`.
    pub fn verify_against(
        &self,
        message: &[u8; 32],
        expected_input_index: u32,
        expected_prev_tx_id: &TxId,
    ) -> Result<bool, SignatureError> {
        if self.input_index != expected_input_index {
            return Err(SignatureError::SignatureMismatch(format!(
                "bound to input {}, presented for input {}",
                self.input_index, expected_input_index
            )));
        }
        if &self.prev_tx_id != expected_prev_tx_id {
            return Err(SignatureError::SignatureMismatch(format!(
                "bound to previous tx {}, presented for {}",
                self.prev_tx_id, expected_prev_tx_id
            )));
        }

        let result = match SigHashType::from_tag(self.sig_type) {
            Some(SigHashType::All) => verify_ecdsa(&self.public_key, message, &self.signature),
            Some(SigHashType::Default) => {
                verify_schnorr(&self.public_key, message, &self.signature)
            }
            _ => return Err(SignatureError::UnsupportedSigType(self.sig_type)),
        };

        match result {
            Ok(valid) => Ok(valid),
            Err(KeyError::InvalidSignature) => Ok(false),
            Err(e) => Err(SignatureError::InvalidArgument(e.to_string())),
        }
    }
}

impl TryFrom<BoundSignatureObject> for BoundSignature {
    type Error = SignatureError;

    fn try_from(object: BoundSignatureObject) -> Result<Self, Self::Error> {
        Self::from_object(object)
    }
}

impl From<BoundSignature> for BoundSignatureObject {
    fn from(sig: BoundSignature) -> Self {
        sig.to_object()
    }
}

// =============================================================================
// Object form
// =============================================================================

/// Loosely-typed wire form; every field is checked by [`BoundSignature::from_object`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundSignatureObject {
    pub public_key: Option<ByteField>,
    pub prev_tx_id: Option<ByteField>,
    pub output_index: Option<Value>,
    pub input_index: Option<Value>,
    pub signature: Option<ByteField>,
    pub sig_type: Option<Value>,
}

/// Binary field given either as a hex string or as raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteField {
    Hex(String),
    Raw(Vec<u8>),
}

impl ByteField {
    fn decode(self, name: &str) -> Result<Vec<u8>, SignatureError> {
        match self {
            ByteField::Hex(s) => hex::decode(&s).map_err(|_| {
                SignatureError::InvalidArgument(format!("{} is not valid hex", name))
            }),
            ByteField::Raw(bytes) => Ok(bytes),
        }
    }
}

fn required<T>(name: &str, value: Option<T>) -> Result<T, SignatureError> {
    value.ok_or_else(|| SignatureError::InvalidArgument(format!("{} is required", name)))
}

/// A finite, non-negative integer that fits in 32 bits
fn index_field(name: &str, value: Option<Value>) -> Result<u32, SignatureError> {
    let value = required(name, value)?;
    let invalid = || {
        SignatureError::InvalidArgument(format!(
            "{} must be a non-negative integer, got {}",
            name, value
        ))
    };

    let n = match &value {
        Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(n), _) => n,
            (None, Some(f)) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => f as u64,
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };
    u32::try_from(n).map_err(|_| invalid())
}
