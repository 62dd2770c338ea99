//! Transaction proposals
//!
//! A proposal is a spend from a shared wallet waiting for its copayers'
//! signatures. It owns its inputs, outputs and signature map; the lifecycle
//! transitions themselves are driven by the manager.

use crate::core::{
    FeeRate, SignatureScheme, SpentOutput, Transaction, TransactionBuilder, TransactionError,
    TxId, TxOutput,
};
use crate::crypto::BoundSignature;
use crate::utxo::Utxo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::MultisigError;

/// Lifecycle state of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being assembled, visible to its creator only
    Draft,
    /// Published, collecting signatures
    Pending,
    /// Quorum reached, not yet broadcast
    Signed,
    Broadcast,
    Rejected,
    Expired,
    Removed,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Broadcast
                | ProposalStatus::Rejected
                | ProposalStatus::Expired
                | ProposalStatus::Removed
        )
    }

    /// Whether the proposal still holds its UTXO locks
    pub fn holds_locks(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Draft | ProposalStatus::Pending | ProposalStatus::Signed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Pending => "pending",
            ProposalStatus::Signed => "signed",
            ProposalStatus::Broadcast => "broadcast",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = MultisigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(ProposalStatus::Draft),
            "pending" => Ok(ProposalStatus::Pending),
            "signed" => Ok(ProposalStatus::Signed),
            "broadcast" => Ok(ProposalStatus::Broadcast),
            "rejected" => Ok(ProposalStatus::Rejected),
            "expired" => Ok(ProposalStatus::Expired),
            "removed" => Ok(ProposalStatus::Removed),
            other => Err(MultisigError::InvalidArgument(format!(
                "unknown proposal status: {}",
                other
            ))),
        }
    }
}

/// A copayer's refusal to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub copayer_id: String,
    pub reason: Option<String>,
    pub rejected_at: DateTime<Utc>,
}

/// Change output paying back to the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOutput {
    pub address: String,
    pub path: String,
    pub amount: u64,
}

/// A transaction proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub wallet_id: String,
    pub creator_id: String,
    pub status: ProposalStatus,
    /// Spent UTXOs, in input order
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub change: Option<ChangeOutput>,
    /// M, copied from the wallet at creation
    pub required_signatures: u8,
    /// N, copied from the wallet at creation
    pub total_copayers: u8,
    pub scheme: SignatureScheme,
    pub fee_rate: FeeRate,
    pub fee: u64,
    pub message: Option<String>,
    /// Copayer id → one signature per input
    #[serde(default)]
    pub signatures: BTreeMap<String, Vec<BoundSignature>>,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub txid: Option<TxId>,
    pub broadcast_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Outputs in transaction order (change last)
    pub fn tx_outputs(&self) -> Vec<TxOutput> {
        let mut outputs = self.outputs.clone();
        if let Some(change) = &self.change {
            outputs.push(TxOutput::new(change.address.clone(), change.amount));
        }
        outputs
    }

    /// The transaction every copayer signs, without witness data
    pub fn unsigned_transaction(&self) -> Transaction {
        let builder = self
            .inputs
            .iter()
            .fold(TransactionBuilder::new(), |b, utxo| b.add_input(utxo.outpoint));
        self.tx_outputs()
            .iter()
            .fold(builder, |b, o| b.add_output(&o.address, o.amount))
            .build()
    }

    /// Signature hash of input `index`
    pub fn sighash(
        &self,
        tx: &Transaction,
        index: usize,
        spent: &[SpentOutput],
    ) -> Result<[u8; 32], TransactionError> {
        tx.signature_hash(
            index,
            spent,
            self.scheme.sig_hash_type().tag(),
            self.id.as_bytes(),
        )
    }

    pub fn outpoints(&self) -> Vec<crate::core::OutPoint> {
        self.inputs.iter().map(|u| u.outpoint).collect()
    }

    pub fn total_input(&self) -> u64 {
        self.inputs.iter().map(|u| u.amount).sum()
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn has_voted(&self, copayer_id: &str) -> bool {
        self.signatures.contains_key(copayer_id)
            || self.rejections.iter().any(|r| r.copayer_id == copayer_id)
    }

    /// Whether the remaining possible signers can still reach M
    pub fn can_reach_quorum(&self) -> bool {
        let remaining = (self.total_copayers as usize).saturating_sub(self.rejections.len());
        remaining >= self.required_signatures as usize
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Fail with `InvalidStateTransition` unless in one of `allowed`
    pub(crate) fn ensure_status(
        &self,
        allowed: &[ProposalStatus],
        action: &'static str,
    ) -> Result<(), MultisigError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(MultisigError::InvalidStateTransition {
                proposal_id: self.id.clone(),
                state: self.status.to_string(),
                action,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{OutPoint, SigHashType};

    pub(crate) fn sample_proposal() -> Proposal {
        Proposal {
            id: "p1".to_string(),
            wallet_id: "w1".to_string(),
            creator_id: "c1".to_string(),
            status: ProposalStatus::Pending,
            inputs: vec![Utxo {
                outpoint: OutPoint::new(TxId([1; 32]), 0),
                amount: 100_000,
                address: "3Wallet".to_string(),
                path: "m/0/0".to_string(),
            }],
            outputs: vec![TxOutput::new("3Recipient", 50_000)],
            change: Some(ChangeOutput {
                address: "3Change".to_string(),
                path: "m/1/0".to_string(),
                amount: 49_000,
            }),
            required_signatures: 2,
            total_copayers: 3,
            scheme: SignatureScheme::Ecdsa,
            fee_rate: FeeRate(2),
            fee: 1_000,
            message: None,
            signatures: BTreeMap::new(),
            rejections: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
            txid: None,
            broadcast_at: None,
        }
    }

    #[test]
    fn test_status_parse_and_terminal() {
        assert_eq!("Pending".parse::<ProposalStatus>().unwrap(), ProposalStatus::Pending);
        assert!("bogus".parse::<ProposalStatus>().is_err());
        assert!(ProposalStatus::Expired.is_terminal());
        assert!(!ProposalStatus::Signed.is_terminal());
        assert!(ProposalStatus::Signed.holds_locks());
        assert!(!ProposalStatus::Removed.holds_locks());
    }

    #[test]
    fn test_unsigned_transaction_includes_change_last() {
        let proposal = sample_proposal();
        let tx = proposal.unsigned_transaction();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].address, "3Change");
        assert_eq!(
            proposal.total_input(),
            proposal.total_output() + 49_000 + proposal.fee
        );
    }

    #[test]
    fn test_sighash_bound_to_proposal_id() {
        let proposal = sample_proposal();
        let mut other = proposal.clone();
        other.id = "p2".to_string();
        let spent = vec![SpentOutput {
            amount: 100_000,
            script: vec![0x51],
        }];

        let tx = proposal.unsigned_transaction();
        let a = proposal.sighash(&tx, 0, &spent).unwrap();
        let b = other.sighash(&tx, 0, &spent).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            a,
            tx.signature_hash(0, &spent, SigHashType::All.tag(), b"p1").unwrap()
        );
    }

    #[test]
    fn test_quorum_reachability() {
        let mut proposal = sample_proposal();
        assert!(proposal.can_reach_quorum());
        proposal.rejections.push(Rejection {
            copayer_id: "a".to_string(),
            reason: None,
            rejected_at: Utc::now(),
        });
        assert!(proposal.can_reach_quorum());
        assert!(proposal.has_voted("a"));
        proposal.rejections.push(Rejection {
            copayer_id: "b".to_string(),
            reason: Some("too much".to_string()),
            rejected_at: Utc::now(),
        });
        assert!(!proposal.can_reach_quorum());
    }

    #[test]
    fn test_ensure_status() {
        let proposal = sample_proposal();
        assert!(proposal
            .ensure_status(&[ProposalStatus::Pending], "sign")
            .is_ok());
        assert!(matches!(
            proposal.ensure_status(&[ProposalStatus::Signed], "broadcast"),
            Err(MultisigError::InvalidStateTransition { .. })
        ));
    }
}
