//! Quorum verification
//!
//! Signatures are checked against the key derived for the signing copayer at
//! each input's path, and against that input's signature hash. Quorum is
//! always recomputed from the stored raw signatures; nothing about an earlier
//! evaluation is trusted.

use crate::core::{SignatureScheme, SpendScript, SpentOutput, Transaction};
use crate::crypto::{ecdsa_der, BoundSignature, CurvePoint};
use crate::wallet::{derive_keys, KeyDeriver, Wallet};
use std::collections::HashMap;

use super::{MultisigError, Proposal};

/// Everything needed to check signatures for one proposal
pub struct SigningContext {
    pub tx: Transaction,
    /// Spend script of each input
    pub scripts: Vec<SpendScript>,
    pub spent: Vec<SpentOutput>,
    /// Signature hash of each input
    pub digests: Vec<[u8; 32]>,
    /// Copayer id → derived key, per input
    keys: Vec<HashMap<String, CurvePoint>>,
}

impl SigningContext {
    pub fn new(
        proposal: &Proposal,
        wallet: &Wallet,
        deriver: &dyn KeyDeriver,
    ) -> Result<Self, MultisigError> {
        if proposal.wallet_id != wallet.id {
            return Err(MultisigError::invariant(format!(
                "proposal {} belongs to wallet {}, not {}",
                proposal.id, proposal.wallet_id, wallet.id
            )));
        }
        if !wallet.is_complete() {
            return Err(MultisigError::WalletNotComplete(wallet.id.clone()));
        }

        let tx = proposal.unsigned_transaction();
        let mut scripts = Vec::with_capacity(proposal.inputs.len());
        let mut keys: Vec<HashMap<String, CurvePoint>> = Vec::with_capacity(proposal.inputs.len());
        for input in &proposal.inputs {
            let derived = derive_keys(wallet, deriver, &input.path)?;
            scripts.push(SpendScript::new(proposal.scheme, wallet.m, derived.clone())?);
            keys.push(
                wallet
                    .copayers
                    .iter()
                    .map(|c| c.id.clone())
                    .zip(derived)
                    .collect(),
            );
        }

        let spent: Vec<SpentOutput> = proposal
            .inputs
            .iter()
            .zip(&scripts)
            .map(|(input, script)| SpentOutput {
                amount: input.amount,
                script: script.script.clone(),
            })
            .collect();

        let digests = (0..proposal.inputs.len())
            .map(|i| proposal.sighash(&tx, i, &spent))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tx,
            scripts,
            spent,
            digests,
            keys,
        })
    }

    /// Key the copayer must sign input `index` with
    pub fn signing_key(&self, copayer_id: &str, index: usize) -> Option<&CurvePoint> {
        self.keys.get(index).and_then(|k| k.get(copayer_id))
    }
}

/// Outcome of a quorum evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    /// Copayers with a complete, valid signature set, in wallet order
    pub signers: Vec<String>,
    pub required: u8,
}

impl Quorum {
    pub fn is_reached(&self) -> bool {
        self.signers.len() >= self.required as usize
    }
}

/// Check one copayer's full signature set (one signature per input, in input order)
pub fn verify_set(
    proposal: &Proposal,
    ctx: &SigningContext,
    copayer_id: &str,
    signatures: &[BoundSignature],
) -> Result<(), MultisigError> {
    if signatures.len() != proposal.inputs.len() {
        return Err(MultisigError::InvalidArgument(format!(
            "expected {} signatures (one per input), got {}",
            proposal.inputs.len(),
            signatures.len()
        )));
    }

    for (index, (sig, input)) in signatures.iter().zip(&proposal.inputs).enumerate() {
        if !proposal.scheme.accepts(sig.sig_type()) {
            return Err(MultisigError::SignatureMismatch(format!(
                "sigType {:#04x} is not accepted by a {:?} wallet",
                sig.sig_type(),
                proposal.scheme
            )));
        }
        if sig.output_index() != input.outpoint.output_index {
            return Err(MultisigError::SignatureMismatch(format!(
                "signature for input {} is bound to output {}, input spends output {}",
                index,
                sig.output_index(),
                input.outpoint.output_index
            )));
        }

        let expected_key = ctx.signing_key(copayer_id, index).ok_or_else(|| {
            MultisigError::NotAuthorized(format!("{} is not a copayer of this wallet", copayer_id))
        })?;
        let key_matches = match proposal.scheme {
            SignatureScheme::Ecdsa => sig.public_key() == expected_key,
            // BIP340 keys are X-only; both sides lift to their even-Y point
            SignatureScheme::Schnorr => {
                CurvePoint::lift_x(&sig.public_key().x())?
                    == CurvePoint::lift_x(&expected_key.x())?
            }
        };
        if !key_matches {
            return Err(MultisigError::SignatureMismatch(format!(
                "input {} was signed with {}, expected the copayer's key {}",
                index,
                sig.public_key(),
                expected_key
            )));
        }

        let valid = sig.verify_against(&ctx.digests[index], index as u32, &input.outpoint.tx_id)?;
        if !valid {
            return Err(MultisigError::SignatureMismatch(format!(
                "signature for input {} does not verify",
                index
            )));
        }
    }

    Ok(())
}

/// Re-verify every stored signature set and count the valid signers
pub fn evaluate(proposal: &Proposal, wallet: &Wallet, ctx: &SigningContext) -> Quorum {
    let signers = wallet
        .copayers
        .iter()
        .filter_map(|copayer| {
            let set = proposal.signatures.get(&copayer.id)?;
            match verify_set(proposal, ctx, &copayer.id, set) {
                Ok(()) => Some(copayer.id.clone()),
                Err(e) => {
                    log::error!(
                        "Stored signatures of {} on proposal {} no longer verify: {}",
                        copayer.id,
                        proposal.id,
                        e
                    );
                    None
                }
            }
        })
        .collect();

    Quorum {
        signers,
        required: proposal.required_signatures,
    }
}

/// Build the fully-signed transaction from the first M valid signers
pub fn assemble(
    proposal: &Proposal,
    ctx: &SigningContext,
    quorum: &Quorum,
) -> Result<Transaction, MultisigError> {
    if !quorum.is_reached() {
        return Err(MultisigError::invariant(format!(
            "proposal {} has {} of {} signatures",
            proposal.id,
            quorum.signers.len(),
            quorum.required
        )));
    }
    let signers = &quorum.signers[..quorum.required as usize];

    let mut tx = ctx.tx.clone();
    for (index, input) in tx.inputs.iter_mut().enumerate() {
        let script = &ctx.scripts[index];
        let mut slots: Vec<Option<String>> = vec![None; script.keys.len()];

        for copayer_id in signers {
            let sig = proposal
                .signatures
                .get(copayer_id)
                .and_then(|set| set.get(index))
                .ok_or_else(|| {
                    MultisigError::invariant(format!(
                        "missing signature of {} for input {}",
                        copayer_id, index
                    ))
                })?;
            let position = script.key_position(sig.public_key()).ok_or_else(|| {
                MultisigError::invariant(format!("key {} not in script", sig.public_key()))
            })?;
            slots[position] = Some(witness_signature(proposal.scheme, sig)?);
        }

        let mut witness = Vec::with_capacity(script.keys.len() + 2);
        match proposal.scheme {
            SignatureScheme::Ecdsa => {
                // CHECKMULTISIG dummy element, then signatures in key order
                witness.push(String::new());
                witness.extend(slots.into_iter().flatten());
            }
            SignatureScheme::Schnorr => {
                // One element per key, last key first; empty means no signature
                witness.extend(slots.into_iter().rev().map(|s| s.unwrap_or_default()));
            }
        }
        witness.push(hex::encode(&script.script));
        input.witness = witness;
    }

    Ok(tx)
}

fn witness_signature(
    scheme: SignatureScheme,
    sig: &BoundSignature,
) -> Result<String, MultisigError> {
    match scheme {
        SignatureScheme::Ecdsa => {
            let mut bytes = ecdsa_der(sig.signature())
                .map_err(|e| MultisigError::invariant(format!("stored signature: {}", e)))?;
            bytes.push(sig.sig_type() as u8);
            Ok(hex::encode(bytes))
        }
        SignatureScheme::Schnorr => Ok(hex::encode(sig.signature())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FeeRate, OutPoint, SigHashType, TxId, TxOutput};
    use crate::crypto::keys::test_keys::TestSigner;
    use crate::multisig::ProposalStatus;
    use crate::utxo::Utxo;
    use crate::wallet::AdditiveDeriver;
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct Fixture {
        wallet: Wallet,
        signers: Vec<TestSigner>,
        proposal: Proposal,
    }

    fn fixture(scheme: SignatureScheme, m: u8, n: u8, inputs: usize) -> Fixture {
        let mut wallet = Wallet::new("w", m, n, scheme, 15).unwrap();
        let signers: Vec<TestSigner> = (0..n).map(|_| TestSigner::generate()).collect();
        for (i, s) in signers.iter().enumerate() {
            wallet.join(&format!("c{}", i), s.point, s.point).unwrap();
        }

        let inputs = (0..inputs)
            .map(|i| Utxo {
                outpoint: OutPoint::new(TxId([i as u8 + 1; 32]), i as u32),
                amount: 50_000,
                address: "3Wallet".to_string(),
                path: format!("m/0/{}", i),
            })
            .collect();

        let proposal = Proposal {
            id: "proposal-1".to_string(),
            wallet_id: wallet.id.clone(),
            creator_id: wallet.copayers[0].id.clone(),
            status: ProposalStatus::Pending,
            inputs,
            outputs: vec![TxOutput::new("3Recipient", 40_000)],
            change: None,
            required_signatures: m,
            total_copayers: n,
            scheme,
            fee_rate: FeeRate(1),
            fee: 10_000,
            message: None,
            signatures: BTreeMap::new(),
            rejections: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
            txid: None,
            broadcast_at: None,
        };

        Fixture {
            wallet,
            signers,
            proposal,
        }
    }

    fn sign_all(f: &Fixture, ctx: &SigningContext, who: usize) -> Vec<BoundSignature> {
        let signer = &f.signers[who];
        f.proposal
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let tweak = AdditiveDeriver::tweak(&signer.point, &input.path).unwrap();
                let child = signer.tweaked(&tweak);
                let (sig, tag) = match f.proposal.scheme {
                    SignatureScheme::Ecdsa => (child.sign_ecdsa(&ctx.digests[i]), SigHashType::All),
                    SignatureScheme::Schnorr => {
                        (child.sign_schnorr(&ctx.digests[i]), SigHashType::Default)
                    }
                };
                BoundSignature::new(
                    child.point,
                    input.outpoint.tx_id,
                    input.outpoint.output_index,
                    i as u32,
                    sig,
                    tag.tag(),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_valid_set_verifies() {
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 2);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let set = sign_all(&f, &ctx, 1);
        verify_set(&f.proposal, &ctx, &f.wallet.copayers[1].id, &set).unwrap();
    }

    #[test]
    fn test_set_credited_to_wrong_copayer_fails() {
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let set = sign_all(&f, &ctx, 1);
        assert!(matches!(
            verify_set(&f.proposal, &ctx, &f.wallet.copayers[2].id, &set),
            Err(MultisigError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_partial_or_swapped_sets_fail_closed() {
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 2);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let id = &f.wallet.copayers[0].id;
        let set = sign_all(&f, &ctx, 0);

        assert!(matches!(
            verify_set(&f.proposal, &ctx, id, &set[..1]),
            Err(MultisigError::InvalidArgument(_))
        ));

        let swapped = vec![set[1].clone(), set[0].clone()];
        assert!(matches!(
            verify_set(&f.proposal, &ctx, id, &swapped),
            Err(MultisigError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_signature_replayed_on_other_proposal_fails() {
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let set = sign_all(&f, &ctx, 0);

        let mut other = f.proposal.clone();
        other.id = "proposal-2".to_string();
        let other_ctx = SigningContext::new(&other, &f.wallet, &AdditiveDeriver).unwrap();
        assert!(matches!(
            verify_set(&other, &other_ctx, &f.wallet.copayers[0].id, &set),
            Err(MultisigError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_schnorr_key_matched_by_x_only() {
        let negated = |set: Vec<BoundSignature>| -> Vec<BoundSignature> {
            set.iter()
                .map(|sig| {
                    BoundSignature::new(
                        sig.public_key().negate(),
                        *sig.prev_tx_id(),
                        sig.output_index(),
                        sig.input_index(),
                        sig.signature().to_vec(),
                        sig.sig_type(),
                    )
                    .unwrap()
                })
                .collect()
        };

        // Same X, other Y parity: the same BIP340 key
        let f = fixture(SignatureScheme::Schnorr, 2, 3, 2);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let set = negated(sign_all(&f, &ctx, 0));
        verify_set(&f.proposal, &ctx, &f.wallet.copayers[0].id, &set).unwrap();

        // ECDSA keys carry their parity
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let set = negated(sign_all(&f, &ctx, 0));
        assert!(matches!(
            verify_set(&f.proposal, &ctx, &f.wallet.copayers[0].id, &set),
            Err(MultisigError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_scheme_mismatch_rejected() {
        let f = fixture(SignatureScheme::Ecdsa, 1, 2, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let good = sign_all(&f, &ctx, 0);
        let schnorr_tag = BoundSignature::new(
            *good[0].public_key(),
            *good[0].prev_tx_id(),
            good[0].output_index(),
            0,
            good[0].signature().to_vec(),
            SigHashType::Default.tag(),
        )
        .unwrap();
        assert!(matches!(
            verify_set(&f.proposal, &ctx, &f.wallet.copayers[0].id, &[schnorr_tag]),
            Err(MultisigError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_evaluate_counts_distinct_valid_signers() {
        let mut f = fixture(SignatureScheme::Ecdsa, 2, 3, 2);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();

        let a = sign_all(&f, &ctx, 0);
        f.proposal.signatures.insert(f.wallet.copayers[0].id.clone(), a);
        assert!(!evaluate(&f.proposal, &f.wallet, &ctx).is_reached());

        // A tampered stored set is not counted
        let mut bad = sign_all(&f, &ctx, 1);
        bad.swap(0, 1);
        f.proposal.signatures.insert(f.wallet.copayers[1].id.clone(), bad);
        assert_eq!(evaluate(&f.proposal, &f.wallet, &ctx).signers.len(), 1);

        let c = sign_all(&f, &ctx, 2);
        f.proposal.signatures.insert(f.wallet.copayers[2].id.clone(), c);
        let quorum = evaluate(&f.proposal, &f.wallet, &ctx);
        assert!(quorum.is_reached());
        assert_eq!(
            quorum.signers,
            vec![f.wallet.copayers[0].id.clone(), f.wallet.copayers[2].id.clone()]
        );
    }

    #[test]
    fn test_assemble_ecdsa_witness() {
        let mut f = fixture(SignatureScheme::Ecdsa, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        for who in [0, 1] {
            let set = sign_all(&f, &ctx, who);
            f.proposal.signatures.insert(f.wallet.copayers[who].id.clone(), set);
        }

        let quorum = evaluate(&f.proposal, &f.wallet, &ctx);
        let tx = assemble(&f.proposal, &ctx, &quorum).unwrap();
        let witness = &tx.inputs[0].witness;
        assert_eq!(witness.len(), 4);
        assert_eq!(witness[0], "");
        assert!(witness[1].ends_with("01"));
        assert_eq!(witness[3], hex::encode(&ctx.scripts[0].script));
        assert_eq!(tx.txid(), ctx.tx.txid());

        // Deterministic: the same signatures assemble the same transaction
        assert_eq!(assemble(&f.proposal, &ctx, &quorum).unwrap(), tx);
    }

    #[test]
    fn test_assemble_schnorr_witness() {
        let mut f = fixture(SignatureScheme::Schnorr, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        for who in [1, 2] {
            let set = sign_all(&f, &ctx, who);
            f.proposal.signatures.insert(f.wallet.copayers[who].id.clone(), set);
        }

        let quorum = evaluate(&f.proposal, &f.wallet, &ctx);
        assert!(quorum.is_reached());
        let tx = assemble(&f.proposal, &ctx, &quorum).unwrap();
        let witness = &tx.inputs[0].witness;
        assert_eq!(witness.len(), 4);
        assert_eq!(witness.iter().filter(|w| w.is_empty()).count(), 1);
        assert!(witness[..3].iter().all(|w| w.is_empty() || w.len() == 128));
    }

    #[test]
    fn test_assemble_requires_quorum() {
        let f = fixture(SignatureScheme::Ecdsa, 2, 3, 1);
        let ctx = SigningContext::new(&f.proposal, &f.wallet, &AdditiveDeriver).unwrap();
        let quorum = evaluate(&f.proposal, &f.wallet, &ctx);
        assert!(matches!(
            assemble(&f.proposal, &ctx, &quorum),
            Err(MultisigError::InvariantViolation(_))
        ));
    }
}
