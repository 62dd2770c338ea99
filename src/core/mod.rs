//! Core transaction components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model, canonical serialization, signature hashes)
//! - Spend scripts (M-of-N ECDSA and Schnorr) and signature hash types
//! - Fee estimation

pub mod fee;
pub mod script;
pub mod transaction;

pub use fee::{estimate_fee, estimate_tx_vsize, FeeRate, DUST_THRESHOLD, MAX_FEE_RATE, MIN_FEE_RATE};
pub use script::{
    estimate_input_vsize, ScriptError, SigHashType, SignatureScheme, SpendScript, MAX_SCRIPT_KEYS,
};
pub use transaction::{
    OutPoint, SpentOutput, Transaction, TransactionBuilder, TransactionError, TxId, TxInput,
    TxOutput, MAX_MONEY, SEQUENCE_FINAL, TX_VERSION,
};
