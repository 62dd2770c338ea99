//! Fee Estimation
//!
//! Size-based fee calculation for proposal transactions:
//! - Fee rate in satoshis per virtual byte
//! - Virtual size estimation from the wallet's spend script shape
//! - Dust threshold for change outputs

use serde::{Deserialize, Serialize};

use super::transaction::{TxOutput, TX_BASE_VSIZE};

// =============================================================================
// Constants
// =============================================================================

/// Default minimum fee rate (sat/vbyte)
pub const MIN_FEE_RATE: u64 = 1;

/// Default maximum fee rate (sat/vbyte)
pub const MAX_FEE_RATE: u64 = 10_000;

/// Outputs below this amount are uneconomical to spend
pub const DUST_THRESHOLD: u64 = 546;

// =============================================================================
// Fee Rate
// =============================================================================

/// Fee rate in satoshis per virtual byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    /// Create from satoshis per byte
    pub fn from_sat_per_byte(rate: u64) -> Self {
        Self(rate)
    }

    /// Calculate fee for a given size
    pub fn fee_for_size(&self, size_bytes: usize) -> u64 {
        self.0.saturating_mul(size_bytes as u64)
    }

    /// Get rate as satoshis per byte
    pub fn as_sat_per_byte(&self) -> u64 {
        self.0
    }

    /// Whether the rate lies within `[min, max]`
    pub fn is_within(&self, min: u64, max: u64) -> bool {
        (min..=max).contains(&self.0)
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(MIN_FEE_RATE)
    }
}

// =============================================================================
// Size Estimation
// =============================================================================

/// Estimated virtual size of a transaction
///
/// `input_vsize` is the per-input size for the wallet's script shape
/// (see [`crate::core::script::estimate_input_vsize`]).
pub fn estimate_tx_vsize(input_count: usize, input_vsize: usize, outputs: &[TxOutput]) -> usize {
    TX_BASE_VSIZE + input_count * input_vsize + outputs.iter().map(TxOutput::vsize).sum::<usize>()
}

/// Estimated fee for a transaction of the given shape
pub fn estimate_fee(
    rate: FeeRate,
    input_count: usize,
    input_vsize: usize,
    outputs: &[TxOutput],
) -> u64 {
    rate.fee_for_size(estimate_tx_vsize(input_count, input_vsize, outputs))
}

// =============================================================================
// Tests
// =============================================================================
