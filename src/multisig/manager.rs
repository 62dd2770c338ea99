//! Multi-signature proposal manager
//!
//! Drives the proposal lifecycle: creation with UTXO locking, publication,
//! signature collection, rejection, broadcast, removal and expiry. Every
//! check-then-mutate sequence on a proposal runs under that proposal's own
//! mutex; UTXO contention between proposals is settled by the lock table.

use crate::core::{
    estimate_input_vsize, FeeRate, OutPoint, SignatureScheme, TxOutput, DUST_THRESHOLD,
    MAX_FEE_RATE, MAX_MONEY, MIN_FEE_RATE,
};
use crate::crypto::{generate_id, BoundSignature, CurvePoint};
use crate::network::{BroadcastError, Broadcaster};
use crate::storage::Store;
use crate::utxo::{select_utxos, LockState, Utxo, UtxoLockManager};
use crate::wallet::{
    address_path, derive_spend_script, Copayer, KeyDeriver, Wallet, WalletAddress,
    WalletRegistry,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::proposal::{ChangeOutput, Proposal, ProposalStatus, Rejection};
use super::quorum::{self, SigningContext};
use super::MultisigError;

// =============================================================================
// Configuration
// =============================================================================

/// Default proposal lifetime (24 hours)
pub const DEFAULT_PROPOSAL_TTL_SECS: u64 = 24 * 60 * 60;

/// Default copayer limit per wallet
pub const DEFAULT_MAX_COPAYERS: u8 = 15;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of Draft/Pending proposals; `None` disables expiry
    pub proposal_ttl_secs: Option<u64>,
    /// Minimum accepted fee rate (sat/vbyte)
    pub min_fee_rate: u64,
    /// Maximum accepted fee rate (sat/vbyte)
    pub max_fee_rate: u64,
    /// Change below this amount is folded into the fee
    pub dust_threshold: u64,
    pub max_copayers: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proposal_ttl_secs: Some(DEFAULT_PROPOSAL_TTL_SECS),
            min_fee_rate: MIN_FEE_RATE,
            max_fee_rate: MAX_FEE_RATE,
            dust_threshold: DUST_THRESHOLD,
            max_copayers: DEFAULT_MAX_COPAYERS,
        }
    }
}

/// Parameters of a new proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRequest {
    pub wallet_id: String,
    pub creator_id: String,
    pub outputs: Vec<TxOutput>,
    pub fee_rate: FeeRate,
    pub message: Option<String>,
}

/// Wallet funds by lock state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub total: u64,
    pub available: u64,
    pub locked: u64,
}

// =============================================================================
// Manager
// =============================================================================

/// Manager for multisig wallets and transaction proposals
pub struct MultisigManager {
    registry: WalletRegistry,
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    locks: UtxoLockManager,
    /// Per-proposal mutexes, dropped once a proposal is terminal
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: EngineConfig,
}

impl MultisigManager {
    pub fn new(
        store: Arc<dyn Store>,
        broadcaster: Arc<dyn Broadcaster>,
        deriver: Arc<dyn KeyDeriver>,
        config: EngineConfig,
    ) -> Result<Self, MultisigError> {
        let locks = UtxoLockManager::load(store.clone())?;
        Ok(Self {
            registry: WalletRegistry::new(store.clone(), deriver, config.max_copayers),
            store,
            broadcaster,
            locks,
            guards: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &UtxoLockManager {
        &self.locks
    }

    // -------------------------------------------------------------------------
    // Wallets
    // -------------------------------------------------------------------------

    /// Register a new M-of-N wallet
    pub fn register_wallet(
        &self,
        name: &str,
        m: u8,
        n: u8,
        scheme: SignatureScheme,
    ) -> Result<Wallet, MultisigError> {
        Ok(self.registry.register(name, m, n, scheme)?)
    }

    /// Join a copayer to a wallet
    pub fn join_wallet(
        &self,
        wallet_id: &str,
        name: &str,
        public_key: CurvePoint,
        request_pub_key: CurvePoint,
    ) -> Result<(Wallet, Copayer), MultisigError> {
        Ok(self
            .registry
            .join(wallet_id, name, public_key, request_pub_key)?)
    }

    pub fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, MultisigError> {
        Ok(self.registry.get(wallet_id)?)
    }

    /// Derive the next receive (or change) address
    pub fn create_address(
        &self,
        wallet_id: &str,
        change: bool,
    ) -> Result<WalletAddress, MultisigError> {
        Ok(self.registry.create_address(wallet_id, change)?)
    }

    /// Record funds reported by the blockchain collaborator
    pub fn register_utxo(
        &self,
        wallet_id: &str,
        outpoint: OutPoint,
        amount: u64,
        address: &str,
    ) -> Result<Utxo, MultisigError> {
        Ok(self
            .registry
            .register_utxo(wallet_id, outpoint, amount, address)?)
    }

    /// Unspent funds of a wallet, split by lock state
    pub fn balance(&self, wallet_id: &str) -> Result<WalletBalance, MultisigError> {
        let wallet = self.registry.get(wallet_id)?;
        let mut balance = WalletBalance::default();
        for utxo in self.store.get_utxos(&wallet.id)? {
            match self.locks.state(&utxo.outpoint) {
                LockState::Free => balance.available += utxo.amount,
                LockState::Locked(_) => balance.locked += utxo.amount,
                LockState::Spent => continue,
            }
            balance.total += utxo.amount;
        }
        Ok(balance)
    }

    // -------------------------------------------------------------------------
    // Proposal lifecycle
    // -------------------------------------------------------------------------

    /// Create a Draft proposal, locking the selected UTXOs to it
    ///
    /// A `LockConflict` means another proposal took a selected UTXO between
    /// selection and locking; the caller may retry with a fresh free pool.
    pub fn create(&self, request: ProposalRequest) -> Result<Proposal, MultisigError> {
        self.open_proposal(request, ProposalStatus::Draft)
    }

    /// Create a proposal that is already Pending
    ///
    /// Same as `create` followed by `publish`, in a single store write: a
    /// failure leaves neither a stray draft nor locked UTXOs behind.
    pub fn create_published(&self, request: ProposalRequest) -> Result<Proposal, MultisigError> {
        self.open_proposal(request, ProposalStatus::Pending)
    }

    fn open_proposal(
        &self,
        request: ProposalRequest,
        status: ProposalStatus,
    ) -> Result<Proposal, MultisigError> {
        let wallet = self.registry.get(&request.wallet_id)?;
        if !wallet.is_complete() {
            return Err(MultisigError::WalletNotComplete(wallet.id));
        }
        member_of(&wallet, &request.creator_id)?;
        self.validate_outputs(&request.outputs)?;
        if !request
            .fee_rate
            .is_within(self.config.min_fee_rate, self.config.max_fee_rate)
        {
            return Err(MultisigError::InvalidArgument(format!(
                "fee rate {} outside [{}, {}] sat/vbyte",
                request.fee_rate.as_sat_per_byte(),
                self.config.min_fee_rate,
                self.config.max_fee_rate
            )));
        }

        let free: Vec<Utxo> = self
            .store
            .get_utxos(&wallet.id)?
            .into_iter()
            .filter(|u| self.locks.is_free(&u.outpoint))
            .collect();
        let change_preview = derive_spend_script(
            &wallet,
            self.registry.deriver(),
            &address_path(true, wallet.change_index),
        )?
        .address();
        let input_vsize = estimate_input_vsize(wallet.scheme, wallet.m, wallet.n as usize);

        let selection = select_utxos(
            &free,
            &request.outputs,
            request.fee_rate,
            input_vsize,
            &change_preview,
            self.config.dust_threshold,
        )
        .map_err(|e| {
            log::warn!("Wallet {}: {}", wallet.id, e);
            MultisigError::from(e)
        })?;

        let id = generate_id(&wallet.id);
        let outpoints: Vec<OutPoint> = selection.utxos.iter().map(|u| u.outpoint).collect();
        self.locks.lock(&outpoints, &id)?;

        let change = if selection.change > 0 {
            match self.registry.create_address(&wallet.id, true) {
                Ok(address) => Some(ChangeOutput {
                    address: address.address,
                    path: address.path,
                    amount: selection.change,
                }),
                Err(e) => {
                    self.release_after_failure(&outpoints, &id);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let now = Utc::now();
        let proposal = Proposal {
            id: id.clone(),
            wallet_id: wallet.id.clone(),
            creator_id: request.creator_id,
            status,
            inputs: selection.utxos,
            outputs: request.outputs,
            change,
            required_signatures: wallet.m,
            total_copayers: wallet.n,
            scheme: wallet.scheme,
            fee_rate: request.fee_rate,
            fee: selection.fee,
            message: request.message,
            signatures: BTreeMap::new(),
            rejections: Vec::new(),
            created_at: now,
            expires_at: self
                .config
                .proposal_ttl_secs
                .map(|secs| now + Duration::seconds(secs as i64)),
            txid: None,
            broadcast_at: None,
        };

        if let Err(e) = self.store.put_proposal(&proposal) {
            self.release_after_failure(&outpoints, &id);
            return Err(e.into());
        }

        log::info!(
            "Created {} proposal {} on wallet {}: {} inputs, {} sat out, fee {} sat",
            proposal.status,
            proposal.id,
            proposal.wallet_id,
            proposal.inputs.len(),
            proposal.total_output(),
            proposal.fee
        );
        Ok(proposal)
    }

    /// Draft → Pending; only the creator may publish
    pub fn publish(&self, proposal_id: &str, copayer_id: &str) -> Result<Proposal, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        let mut proposal = self.load(proposal_id)?;
        if proposal.creator_id != copayer_id {
            return Err(MultisigError::NotAuthorized(format!(
                "only the creator may publish proposal {}",
                proposal_id
            )));
        }
        proposal.ensure_status(&[ProposalStatus::Draft], "publish")?;

        proposal.status = ProposalStatus::Pending;
        self.store.put_proposal(&proposal)?;
        log::info!("Published proposal {}", proposal.id);
        Ok(proposal)
    }

    /// Record a copayer's signature set (one signature per input)
    ///
    /// Moves the proposal to Signed once M distinct copayers have complete,
    /// valid sets.
    pub fn submit_signatures(
        &self,
        proposal_id: &str,
        copayer_id: &str,
        signatures: Vec<BoundSignature>,
    ) -> Result<Proposal, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        let mut proposal = self.load(proposal_id)?;
        proposal.ensure_status(&[ProposalStatus::Pending], "sign")?;
        let wallet = self.registry.get(&proposal.wallet_id)?;
        member_of(&wallet, copayer_id)?;
        if proposal.has_voted(copayer_id) {
            return Err(MultisigError::DuplicateVote(copayer_id.to_string()));
        }

        let ctx = SigningContext::new(&proposal, &wallet, self.registry.deriver())?;
        if let Err(e) = quorum::verify_set(&proposal, &ctx, copayer_id, &signatures) {
            log::warn!(
                "Refused signatures from {} on proposal {}: {}",
                copayer_id,
                proposal.id,
                e
            );
            return Err(e);
        }

        proposal
            .signatures
            .insert(copayer_id.to_string(), signatures);
        let quorum = quorum::evaluate(&proposal, &wallet, &ctx);
        if quorum.is_reached() {
            proposal.status = ProposalStatus::Signed;
        }
        self.store.put_proposal(&proposal)?;

        log::info!(
            "Copayer {} signed proposal {} ({}/{}){}",
            copayer_id,
            proposal.id,
            quorum.signers.len(),
            proposal.required_signatures,
            if quorum.is_reached() { ", quorum reached" } else { "" }
        );
        Ok(proposal)
    }

    /// Record a copayer's refusal; rejects the proposal once M is out of reach
    pub fn reject(
        &self,
        proposal_id: &str,
        copayer_id: &str,
        reason: Option<String>,
    ) -> Result<Proposal, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        let mut proposal = self.load(proposal_id)?;
        proposal.ensure_status(&[ProposalStatus::Pending], "reject")?;
        let wallet = self.registry.get(&proposal.wallet_id)?;
        member_of(&wallet, copayer_id)?;
        if proposal.has_voted(copayer_id) {
            return Err(MultisigError::DuplicateVote(copayer_id.to_string()));
        }

        proposal.rejections.push(Rejection {
            copayer_id: copayer_id.to_string(),
            reason,
            rejected_at: Utc::now(),
        });
        if !proposal.can_reach_quorum() {
            proposal.status = ProposalStatus::Rejected;
        }
        self.store.put_proposal(&proposal)?;

        if proposal.status == ProposalStatus::Rejected {
            self.locks.release(&proposal.outpoints(), &proposal.id)?;
            self.forget_guard(&proposal.id);
            log::info!("Proposal {} rejected", proposal.id);
        } else {
            log::info!("Copayer {} rejected proposal {}", copayer_id, proposal.id);
        }
        Ok(proposal)
    }

    /// Assemble the signed transaction and hand it to the network
    ///
    /// On broadcaster failure the proposal stays Signed and may be broadcast
    /// again; re-assembly yields the same transaction.
    pub fn broadcast(
        &self,
        proposal_id: &str,
        copayer_id: &str,
    ) -> Result<Proposal, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        let mut proposal = self.load(proposal_id)?;
        let wallet = self.registry.get(&proposal.wallet_id)?;
        member_of(&wallet, copayer_id)?;
        proposal.ensure_status(&[ProposalStatus::Signed], "broadcast")?;

        let ctx = SigningContext::new(&proposal, &wallet, self.registry.deriver())?;
        let quorum = quorum::evaluate(&proposal, &wallet, &ctx);
        let tx = quorum::assemble(&proposal, &ctx, &quorum)?;

        let txid = match self.broadcaster.broadcast(&tx) {
            Ok(txid) => txid,
            Err(BroadcastError::AlreadyKnown(txid)) => {
                log::info!("Transaction {} was already broadcast", txid);
                txid
            }
            Err(e) => {
                log::warn!("Broadcast of proposal {} failed: {}", proposal.id, e);
                return Err(e.into());
            }
        };

        let outpoints = proposal.outpoints();
        let already_spent = outpoints
            .iter()
            .all(|o| self.locks.state(o) == LockState::Spent);
        if !already_spent {
            self.locks.mark_spent(&outpoints, &proposal.id)?;
        }

        proposal.status = ProposalStatus::Broadcast;
        proposal.txid = Some(txid);
        proposal.broadcast_at = Some(Utc::now());
        self.store.put_proposal(&proposal)?;
        self.forget_guard(&proposal.id);

        log::info!("Proposal {} broadcast as {}", proposal.id, txid);
        Ok(proposal)
    }

    /// Cancel an unsigned Draft/Pending proposal; creator only
    pub fn remove(&self, proposal_id: &str, copayer_id: &str) -> Result<Proposal, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        let mut proposal = self.load(proposal_id)?;
        if proposal.creator_id != copayer_id {
            return Err(MultisigError::NotAuthorized(format!(
                "only the creator may remove proposal {}",
                proposal_id
            )));
        }
        proposal.ensure_status(&[ProposalStatus::Draft, ProposalStatus::Pending], "remove")?;
        if !proposal.signatures.is_empty() {
            return Err(MultisigError::InvalidStateTransition {
                proposal_id: proposal.id.clone(),
                state: format!(
                    "{} with {} signatures",
                    proposal.status,
                    proposal.signatures.len()
                ),
                action: "remove",
            });
        }

        proposal.status = ProposalStatus::Removed;
        self.store.put_proposal(&proposal)?;
        self.locks.release(&proposal.outpoints(), &proposal.id)?;
        self.forget_guard(&proposal.id);

        log::info!("Proposal {} removed by its creator", proposal.id);
        Ok(proposal)
    }

    /// Expire Draft/Pending proposals past their TTL and release their locks
    ///
    /// Safe to run at any time: a proposal that reached quorum first is left
    /// alone. Also frees locks still held by rejected, expired or removed
    /// proposals (left behind if a release failed earlier).
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>, MultisigError> {
        let mut expired = Vec::new();

        for candidate in self.store.list_proposals(None)? {
            let open = matches!(
                candidate.status,
                ProposalStatus::Draft | ProposalStatus::Pending
            );
            if open && candidate.is_expired(now) {
                match self.expire_one(&candidate.id, now) {
                    Ok(true) => expired.push(candidate.id),
                    Ok(false) => {}
                    Err(e) => log::error!("Failed to expire proposal {}: {}", candidate.id, e),
                }
            } else if candidate.status.is_terminal()
                && candidate.status != ProposalStatus::Broadcast
            {
                self.reconcile_locks(&candidate);
            }
        }

        if !expired.is_empty() {
            log::info!("Expired {} proposals", expired.len());
        }
        Ok(expired)
    }

    fn expire_one(&self, proposal_id: &str, now: DateTime<Utc>) -> Result<bool, MultisigError> {
        let slot = self.guard(proposal_id)?;
        let _guard = slot.lock();

        // Re-read under the guard: a racing submission may have reached quorum
        let mut proposal = self.load(proposal_id)?;
        let open = matches!(
            proposal.status,
            ProposalStatus::Draft | ProposalStatus::Pending
        );
        if !open || !proposal.is_expired(now) {
            return Ok(false);
        }

        proposal.status = ProposalStatus::Expired;
        self.store.put_proposal(&proposal)?;
        self.locks.release(&proposal.outpoints(), &proposal.id)?;
        self.forget_guard(&proposal.id);
        log::info!("Proposal {} expired", proposal.id);
        Ok(true)
    }

    fn reconcile_locks(&self, proposal: &Proposal) {
        let held: Vec<OutPoint> = proposal
            .outpoints()
            .into_iter()
            .filter(|o| self.locks.state(o) == LockState::Locked(proposal.id.clone()))
            .collect();
        if held.is_empty() {
            return;
        }
        log::warn!(
            "Releasing {} UTXOs still locked by {} proposal {}",
            held.len(),
            proposal.status,
            proposal.id
        );
        if let Err(e) = self.locks.release(&held, &proposal.id) {
            log::error!("Failed to release locks of {}: {}", proposal.id, e);
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// A proposal as seen by `requester`; Drafts are visible to their creator only
    pub fn get(&self, proposal_id: &str, requester: &str) -> Result<Proposal, MultisigError> {
        let proposal = self.load(proposal_id)?;
        let wallet = self.registry.get(&proposal.wallet_id)?;
        member_of(&wallet, requester)?;
        if !visible_to(&proposal, requester) {
            return Err(MultisigError::NotFound(format!("proposal {}", proposal_id)));
        }
        Ok(proposal)
    }

    /// A wallet's proposals visible to `requester`, oldest first
    pub fn list(
        &self,
        wallet_id: &str,
        requester: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, MultisigError> {
        let wallet = self.registry.get(wallet_id)?;
        member_of(&wallet, requester)?;
        Ok(self
            .store
            .list_proposals(Some(&wallet.id))?
            .into_iter()
            .filter(|p| visible_to(p, requester))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect())
    }

    /// Every proposal of a wallet regardless of visibility (operator view)
    pub fn list_all(
        &self,
        wallet_id: Option<&str>,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, MultisigError> {
        Ok(self
            .store
            .list_proposals(wallet_id)?
            .into_iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn load(&self, proposal_id: &str) -> Result<Proposal, MultisigError> {
        self.store
            .get_proposal(proposal_id)?
            .ok_or_else(|| MultisigError::NotFound(format!("proposal {}", proposal_id)))
    }

    /// Per-proposal mutex
    ///
    /// Only proposals that can still change get a shared entry; unknown ids
    /// fail with `NotFound` and terminal proposals get a throwaway mutex.
    fn guard(&self, proposal_id: &str) -> Result<Arc<Mutex<()>>, MultisigError> {
        let mut guards = self.guards.lock();
        if let Some(slot) = guards.get(proposal_id) {
            return Ok(slot.clone());
        }
        let slot = Arc::new(Mutex::new(()));
        if !self.load(proposal_id)?.status.is_terminal() {
            guards.insert(proposal_id.to_string(), slot.clone());
        }
        Ok(slot)
    }

    /// Terminal proposals never change again, so their mutex can go
    fn forget_guard(&self, proposal_id: &str) {
        self.guards.lock().remove(proposal_id);
    }

    fn validate_outputs(&self, outputs: &[TxOutput]) -> Result<(), MultisigError> {
        if outputs.is_empty() {
            return Err(MultisigError::InvalidArgument(
                "at least one output is required".to_string(),
            ));
        }
        let mut total: u64 = 0;
        for output in outputs {
            if output.address.trim().is_empty() {
                return Err(MultisigError::InvalidArgument(
                    "output address is required".to_string(),
                ));
            }
            if output.amount < self.config.dust_threshold {
                return Err(MultisigError::InvalidArgument(format!(
                    "output of {} sat to {} is below the dust threshold",
                    output.amount, output.address
                )));
            }
            total = total
                .checked_add(output.amount)
                .filter(|total| *total <= MAX_MONEY)
                .ok_or_else(|| {
                    MultisigError::InvalidArgument(format!(
                        "outputs exceed the {} sat limit",
                        MAX_MONEY
                    ))
                })?;
        }
        Ok(())
    }

    fn release_after_failure(&self, outpoints: &[OutPoint], proposal_id: &str) {
        if let Err(e) = self.locks.release(outpoints, proposal_id) {
            log::error!(
                "Failed to release locks of abandoned proposal {}: {}",
                proposal_id,
                e
            );
        }
    }
}

fn member_of(wallet: &Wallet, copayer_id: &str) -> Result<(), MultisigError> {
    if wallet.is_copayer(copayer_id) {
        Ok(())
    } else {
        Err(MultisigError::NotAuthorized(format!(
            "{} is not a copayer of wallet {}",
            copayer_id, wallet.id
        )))
    }
}

fn visible_to(proposal: &Proposal, requester: &str) -> bool {
    proposal.status != ProposalStatus::Draft || proposal.creator_id == requester
}

// =============================================================================
// Tests
// =============================================================================
