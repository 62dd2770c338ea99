//! Coin selection
//!
//! Greedy by descending amount; equal amounts keep the ledger's insertion
//! order. The fee is re-estimated after every added input, and leftover
//! value goes to a change output unless it would be dust.

use super::Utxo;
use crate::core::{estimate_fee, FeeRate, TxOutput};
use thiserror::Error;

/// Result of a successful selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected inputs, largest first
    pub utxos: Vec<Utxo>,
    pub fee: u64,
    /// Change amount; zero when no change output is needed
    pub change: u64,
}

impl Selection {
    pub fn total_in(&self) -> u64 {
        self.utxos.iter().map(|u| u.amount).sum()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Insufficient funds: need {required} sat, {available} sat available")]
pub struct InsufficientFunds {
    pub required: u64,
    pub available: u64,
}

/// Pick the fewest largest UTXOs covering `outputs` plus fee
///
/// `candidates` must be the free pool in ledger insertion order. The change
/// output is sized with `change_address` so its bytes are paid for.
pub fn select_utxos(
    candidates: &[Utxo],
    outputs: &[TxOutput],
    rate: FeeRate,
    input_vsize: usize,
    change_address: &str,
    dust_threshold: u64,
) -> Result<Selection, InsufficientFunds> {
    let available = candidates
        .iter()
        .fold(0u64, |acc, u| acc.saturating_add(u.amount));
    let target = outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
        .ok_or(InsufficientFunds {
            required: u64::MAX,
            available,
        })?;

    let mut sorted: Vec<&Utxo> = candidates.iter().collect();
    // sort_by is stable, so ties keep insertion order
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));

    let mut with_change = outputs.to_vec();
    with_change.push(TxOutput::new(change_address, 0));

    let mut selected = Vec::new();
    // Amounts whose sum does not fit in u64 can never be covered
    let mut total: u64 = 0;
    let mut required = target;

    for utxo in sorted {
        total = match total.checked_add(utxo.amount) {
            Some(total) => total,
            None => break,
        };
        selected.push(utxo.clone());

        let fee_no_change = estimate_fee(rate, selected.len(), input_vsize, outputs);
        let fee_change = estimate_fee(rate, selected.len(), input_vsize, &with_change);
        match target.checked_add(fee_no_change) {
            Some(needed) => required = needed,
            None => {
                required = u64::MAX;
                break;
            }
        }

        if total < required {
            continue;
        }

        let change = target
            .checked_add(fee_change)
            .and_then(|needed| total.checked_sub(needed));
        let selection = match change {
            Some(change) if change >= dust_threshold => Selection {
                utxos: selected,
                fee: fee_change,
                change,
            },
            // Sub-dust leftover is folded into the fee
            _ => Selection {
                utxos: selected,
                fee: total - target,
                change: 0,
            },
        };
        log::debug!(
            "Selected {} inputs ({} sat) for {} sat, fee {} sat, change {} sat",
            selection.utxos.len(),
            total,
            target,
            selection.fee,
            selection.change
        );
        return Ok(selection);
    }

    Err(InsufficientFunds {
        required,
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TxId};

    fn utxo(n: u8, amount: u64) -> Utxo {
        Utxo {
            outpoint: OutPoint::new(TxId([n; 32]), 0),
            amount,
            address: "3Wallet".to_string(),
            path: "m/0/0".to_string(),
        }
    }

    fn pay(amount: u64) -> Vec<TxOutput> {
        vec![TxOutput::new("3Recipient", amount)]
    }

    #[test]
    fn test_largest_first_minimizes_inputs() {
        let pool = vec![utxo(1, 10_000), utxo(2, 80_000), utxo(3, 30_000)];
        let sel = select_utxos(&pool, &pay(50_000), FeeRate(1), 300, "3Change", 546).unwrap();
        assert_eq!(sel.utxos.len(), 1);
        assert_eq!(sel.utxos[0].amount, 80_000);
        assert_eq!(sel.total_in(), 50_000 + sel.fee + sel.change);
        assert!(sel.change >= 546);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let pool = vec![utxo(1, 5_000), utxo(2, 20_000), utxo(3, 20_000)];
        let sel = select_utxos(&pool, &pay(10_000), FeeRate(1), 300, "3Change", 546).unwrap();
        assert_eq!(sel.utxos[0].outpoint, pool[1].outpoint);
    }

    #[test]
    fn test_accumulates_until_covered() {
        let pool = vec![utxo(1, 30_000), utxo(2, 30_000), utxo(3, 30_000)];
        let sel = select_utxos(&pool, &pay(55_000), FeeRate(2), 300, "3Change", 546).unwrap();
        assert_eq!(sel.utxos.len(), 2);
        assert_eq!(sel.total_in(), 55_000 + sel.fee + sel.change);
    }

    #[test]
    fn test_dust_change_folded_into_fee() {
        let outputs = pay(99_000);
        let fee = estimate_fee(FeeRate(1), 1, 300, &outputs);
        let pool = vec![utxo(1, 99_000 + fee + 100)];
        let sel = select_utxos(&pool, &outputs, FeeRate(1), 300, "3Change", 546).unwrap();
        assert_eq!(sel.change, 0);
        assert_eq!(sel.fee, fee + 100);
    }

    #[test]
    fn test_insufficient_funds() {
        let pool = vec![utxo(1, 1_000), utxo(2, 2_000)];
        let err = select_utxos(&pool, &pay(5_000), FeeRate(1), 300, "3Change", 546).unwrap_err();
        assert_eq!(err.available, 3_000);
        assert!(err.required > 5_000);

        assert!(select_utxos(&[], &pay(1), FeeRate(1), 300, "3Change", 546).is_err());
    }

    #[test]
    fn test_overflowing_outputs_are_never_covered() {
        let pool = vec![utxo(1, u64::MAX)];
        let outputs = vec![
            TxOutput::new("3Recipient", u64::MAX - 1_000),
            TxOutput::new("3Other", 2_000),
        ];
        let err = select_utxos(&pool, &outputs, FeeRate(1), 300, "3Change", 546).unwrap_err();
        assert_eq!(err.required, u64::MAX);
        assert_eq!(err.available, u64::MAX);

        // Inputs that would overflow the running total stop the selection
        let pool = vec![utxo(1, u64::MAX), utxo(2, u64::MAX)];
        assert!(select_utxos(&pool, &pay(u64::MAX), FeeRate(1), 300, "3Change", 546).is_err());
    }
}
