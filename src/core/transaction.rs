//! Transaction handling
//!
//! UTXO-based transaction model used to assemble the final, fully-signed
//! spend of a proposal. Serialization is Bitcoin-like (little-endian integers,
//! compact-size prefixes); the transaction id is the double SHA-256 of the
//! serialization without witness data.

use crate::crypto::{double_sha256, sha256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: u32 = 2;

/// Sequence number that disables locktime and replacement
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

/// Largest amount any single value or sum of values may carry (sat)
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Domain separator mixed into every signature hash
pub const SIGHASH_TAG: &[u8] = b"multisig-wallet/sighash/v1";

/// Base size of a transaction without inputs or outputs
/// (version + locktime + input/output counts)
pub const TX_BASE_VSIZE: usize = 10;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Input index {index} out of range ({count} inputs)")]
    InputOutOfRange { index: usize, count: usize },
    #[error("Invalid transaction id: {0}")]
    InvalidTxId(String),
}

// =============================================================================
// Transaction Id
// =============================================================================

/// 32-byte transaction identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransactionError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            TransactionError::InvalidTxId(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for TxId {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| TransactionError::InvalidTxId(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Outpoint / Inputs / Outputs
// =============================================================================

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    pub tx_id: TxId,
    pub output_index: u32,
}

impl OutPoint {
    pub fn new(tx_id: TxId, output_index: u32) -> Self {
        Self {
            tx_id,
            output_index,
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.tx_id.0);
        buf.extend_from_slice(&self.output_index.to_le_bytes());
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.output_index)
    }
}

/// Transaction input (reference to previous output plus unlocking data)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    pub prev_out: OutPoint,
    pub sequence: u32,
    /// Unlocking stack: signatures in script order followed by the script
    #[serde(default)]
    pub witness: Vec<String>,
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in satoshis
    pub amount: u64,
    /// Recipient address
    pub address: String,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            amount,
            address: address.into(),
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.amount.to_le_bytes());
        write_bytes(buf, self.address.as_bytes());
    }

    /// Estimated serialized size of this output
    pub fn vsize(&self) -> usize {
        8 + compact_size_len(self.address.len()) + self.address.len()
    }
}

/// The output being spent by an input, as committed to by its signature hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentOutput {
    pub amount: u64,
    pub script: Vec<u8>,
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    /// Serialization without witness data (the part the txid commits to)
    pub fn serialize_base(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prev_out.write(&mut buf);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(&mut buf);
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Full serialization including every input's witness stack
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.serialize_base();
        for input in &self.inputs {
            write_compact_size(&mut buf, input.witness.len() as u64);
            for item in &input.witness {
                // Witness items are hex; invalid hex cannot be produced by the assembler
                write_bytes(&mut buf, &hex::decode(item).unwrap_or_default());
            }
        }
        buf
    }

    pub fn txid(&self) -> TxId {
        TxId(double_sha256(&self.serialize_base()))
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn is_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| !i.witness.is_empty())
    }

    /// Signature hash for one input
    ///
    /// Commits to `domain` (the proposal id), every outpoint, amount and
    /// sequence, every output, and the signed input's index, outpoint, amount
    /// and script, plus the sigType tag. A signature made for one input or one
    /// proposal therefore never verifies for another.
    pub fn signature_hash(
        &self,
        input_index: usize,
        spent: &[SpentOutput],
        sig_type: u32,
        domain: &[u8],
    ) -> Result<[u8; 32], TransactionError> {
        let count = self.inputs.len();
        if input_index >= count {
            return Err(TransactionError::InputOutOfRange {
                index: input_index,
                count,
            });
        }
        if spent.len() != count {
            return Err(TransactionError::InvalidTransaction(format!(
                "{} spent outputs for {} inputs",
                spent.len(),
                count
            )));
        }

        let mut prevouts = Vec::with_capacity(count * 36);
        let mut amounts = Vec::with_capacity(count * 8);
        let mut sequences = Vec::with_capacity(count * 4);
        for (input, out) in self.inputs.iter().zip(spent) {
            input.prev_out.write(&mut prevouts);
            amounts.extend_from_slice(&out.amount.to_le_bytes());
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for output in &self.outputs {
            output.write(&mut outputs);
        }

        let mut preimage = Vec::with_capacity(256);
        write_bytes(&mut preimage, SIGHASH_TAG);
        write_bytes(&mut preimage, domain);
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&self.locktime.to_le_bytes());
        preimage.extend_from_slice(&sha256(&prevouts));
        preimage.extend_from_slice(&sha256(&amounts));
        preimage.extend_from_slice(&sha256(&sequences));
        preimage.extend_from_slice(&sha256(&outputs));
        preimage.extend_from_slice(&(input_index as u32).to_le_bytes());
        self.inputs[input_index].prev_out.write(&mut preimage);
        preimage.extend_from_slice(&spent[input_index].amount.to_le_bytes());
        write_bytes(&mut preimage, &spent[input_index].script);
        preimage.extend_from_slice(&sig_type.to_le_bytes());

        Ok(double_sha256(&preimage))
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for unsigned transactions
pub struct TransactionBuilder {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input spending the given outpoint
    pub fn add_input(mut self, prev_out: OutPoint) -> Self {
        self.inputs.push(TxInput {
            prev_out,
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        });
        self
    }

    /// Add an output
    pub fn add_output(mut self, address: &str, amount: u64) -> Self {
        self.outputs.push(TxOutput::new(address, amount));
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            version: TX_VERSION,
            inputs: self.inputs,
            outputs: self.outputs,
            locktime: 0,
        }
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub(crate) fn compact_size_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(byte: u8, index: u32) -> OutPoint {
        OutPoint::new(TxId([byte; 32]), index)
    }

    fn sample_tx() -> (Transaction, Vec<SpentOutput>) {
        let tx = TransactionBuilder::new()
            .add_input(outpoint(1, 0))
            .add_input(outpoint(2, 3))
            .add_output("recipient", 50_000)
            .add_output("change", 40_000)
            .build();
        let spent = vec![
            SpentOutput {
                amount: 60_000,
                script: vec![0x51],
            },
            SpentOutput {
                amount: 35_000,
                script: vec![0x51],
            },
        ];
        (tx, spent)
    }

    #[test]
    fn test_txid_ignores_witness() {
        let (mut tx, _) = sample_tx();
        let before = tx.txid();
        tx.inputs[0].witness = vec!["00".to_string(), "abcd".to_string()];
        assert_eq!(tx.txid(), before);
        assert_ne!(tx.serialize(), tx.serialize_base());
    }

    #[test]
    fn test_txid_changes_with_outputs() {
        let (tx, _) = sample_tx();
        let mut other = tx.clone();
        other.outputs[0].amount += 1;
        assert_ne!(tx.txid(), other.txid());
    }

    #[test]
    fn test_sighash_binds_input_and_domain() {
        let (tx, spent) = sample_tx();
        let h0 = tx.signature_hash(0, &spent, 1, b"proposal-a").unwrap();
        let h1 = tx.signature_hash(1, &spent, 1, b"proposal-a").unwrap();
        let other_domain = tx.signature_hash(0, &spent, 1, b"proposal-b").unwrap();
        let other_type = tx.signature_hash(0, &spent, 0, b"proposal-a").unwrap();

        assert_ne!(h0, h1);
        assert_ne!(h0, other_domain);
        assert_ne!(h0, other_type);
        assert_eq!(h0, tx.signature_hash(0, &spent, 1, b"proposal-a").unwrap());
    }

    #[test]
    fn test_sighash_commits_to_amounts() {
        let (tx, mut spent) = sample_tx();
        let before = tx.signature_hash(1, &spent, 1, b"p").unwrap();
        spent[0].amount += 1;
        assert_ne!(before, tx.signature_hash(1, &spent, 1, b"p").unwrap());
    }

    #[test]
    fn test_sighash_bounds() {
        let (tx, spent) = sample_tx();
        assert_eq!(
            tx.signature_hash(2, &spent, 1, b"p"),
            Err(TransactionError::InputOutOfRange { index: 2, count: 2 })
        );
        assert!(tx.signature_hash(0, &spent[..1], 1, b"p").is_err());
    }

    #[test]
    fn test_txid_hex_parse() {
        let id = TxId([0xab; 32]);
        assert_eq!(id.to_hex().parse::<TxId>().unwrap(), id);
        assert!("abcd".parse::<TxId>().is_err());
        assert!("zz".parse::<TxId>().is_err());
    }

    #[test]
    fn test_compact_size() {
        let mut buf = Vec::new();
        write_compact_size(&mut buf, 0xfc);
        write_compact_size(&mut buf, 0xfd);
        assert_eq!(buf, vec![0xfc, 0xfd, 0xfd, 0x00]);
        assert_eq!(compact_size_len(0xfd), 3);
    }
}
