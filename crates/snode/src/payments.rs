//! Payment election (C3).
//!
//! Ranks snodes per block, emits and tallies winner votes, validates the
//! resulting coinbase payment, and fills block templates for producers.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::constants::{MIN_SNODE_PAYMENT_PROTO_V1, MIN_SNODE_PAYMENT_PROTO_V2};
use aurumd_consensus::money::Amount;
use aurumd_consensus::{snode_payment, ChainParams, Hash256};
use aurumd_primitives::transaction::total_output_value;
use aurumd_primitives::{OutPoint, TxOut};

use crate::chain::ChainView;
use crate::clock::Clock;
use crate::fulfilled::FulfilledRequests;
use crate::governance::GovernanceView;
use crate::messages::PaymentVote;
use crate::net::{
    Inv, NetSink, PeerId, SnodeMessage, MSG_SNODE_PAYMENT_BLOCK, MSG_SNODE_PAYMENT_VOTE,
};
use crate::registry::Registry;
use crate::spork::SporkSet;
use crate::sync::{SyncFlags, SYNC_ASSET_VOTES};
use crate::{LocalSnode, Rejection, ScheduleView};

/// Votes needed before a payee is enforced.
pub const SNODE_PAYMENT_SIGNATURES_REQUIRED: usize = 6;
/// Size of the voting quorum (top ranks at `height - 101`).
pub const SNODE_PAYMENT_SIGNATURES_TOTAL: usize = 10;

/// Votes are accepted up to this many blocks ahead of the tip.
pub const VOTE_FUTURE_WINDOW: i64 = 20;
/// Each tip update votes for the block this far ahead.
pub const VOTE_TARGET_OFFSET: i64 = 10;
/// A payee may appear at most this far ahead before being skipped.
pub const SCHEDULE_LOOKAHEAD: i64 = 8;

const MIN_BLOCKS_TO_STORE: i64 = 6000;

/// Minimum protocol a peer needs to take part in payments.
pub fn min_snode_payment_proto(sporks: &SporkSet) -> i32 {
    if sporks.pay_updated_nodes() {
        MIN_SNODE_PAYMENT_PROTO_V2
    } else {
        MIN_SNODE_PAYMENT_PROTO_V1
    }
}

/// Historical voting data retained, in blocks.
pub fn storage_limit(registry_size: usize) -> i64 {
    ((registry_size as i64) * 5 / 4).max(MIN_BLOCKS_TO_STORE)
}

struct PayeeRow {
    script: Vec<u8>,
    vote_hashes: Vec<Hash256>,
}

/// Vote tally for one target block height.
pub struct BlockPayees {
    height: i64,
    payees: Vec<PayeeRow>,
}

impl BlockPayees {
    fn new(height: i64) -> Self {
        Self {
            height,
            payees: Vec::new(),
        }
    }

    fn add_vote(&mut self, script: &[u8], vote_hash: Hash256) {
        for row in &mut self.payees {
            if row.script == script {
                row.vote_hashes.push(vote_hash);
                return;
            }
        }
        self.payees.push(PayeeRow {
            script: script.to_vec(),
            vote_hashes: vec![vote_hash],
        });
    }

    /// Payee with the most votes; ties break by first insertion.
    fn best_payee(&self) -> Option<&PayeeRow> {
        let mut best: Option<&PayeeRow> = None;
        let mut votes = 0usize;
        for row in &self.payees {
            if row.vote_hashes.len() > votes {
                votes = row.vote_hashes.len();
                best = Some(row);
            }
        }
        best
    }

    fn max_signatures(&self) -> usize {
        self.payees
            .iter()
            .map(|row| row.vote_hashes.len())
            .max()
            .unwrap_or(0)
    }

    fn total_votes(&self) -> usize {
        self.payees.iter().map(|row| row.vote_hashes.len()).sum()
    }

    fn payees_with_votes(&self, min_votes: usize) -> Vec<Vec<u8>> {
        self.payees
            .iter()
            .filter(|row| row.vote_hashes.len() >= min_votes)
            .map(|row| row.script.clone())
            .collect()
    }

    fn is_transaction_valid(
        &self,
        outputs: &[TxOut],
        snode_payment: Amount,
        network: aurumd_consensus::Network,
    ) -> bool {
        if self.max_signatures() < SNODE_PAYMENT_SIGNATURES_REQUIRED {
            // not enough consensus, accept the longest chain
            return true;
        }
        let mut possible = Vec::new();
        for row in &self.payees {
            if row.vote_hashes.len() < SNODE_PAYMENT_SIGNATURES_REQUIRED {
                continue;
            }
            for out in outputs {
                if out.script_pubkey == row.script && out.value == snode_payment {
                    return true;
                }
            }
            if let Some(address) = aurumd_primitives::script_pubkey_to_address(&row.script, network)
            {
                possible.push(address);
            }
        }
        aurumd_log::log_error!(
            "missing required snode payment at height {}, possible payees: {}",
            self.height,
            possible.join(",")
        );
        false
    }
}

#[derive(Default)]
struct VoteState {
    votes: HashMap<Hash256, (PaymentVote, bool)>,
    last_vote_by: HashMap<OutPoint, i64>,
    did_not_vote: HashMap<OutPoint, u32>,
}

pub struct PaymentVoter {
    tally: Mutex<BTreeMap<i64, BlockPayees>>,
    votes: Mutex<VoteState>,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    net: Arc<dyn NetSink>,
    sporks: Arc<SporkSet>,
    params: Arc<ChainParams>,
    sync_flags: Arc<SyncFlags>,
    local: Arc<LocalSnode>,
    cached_height: Arc<AtomicI64>,
}

impl ScheduleView for PaymentVoter {
    /// Is this payee already due within the propagation window?
    fn is_scheduled(&self, payee_script: &[u8], not_height: i64) -> bool {
        if !self.sync_flags.is_list_synced() {
            return false;
        }
        let tip = self.cached_height.load(Ordering::Relaxed);
        let tally = self.tally.lock().expect("tally lock");
        for height in tip..=tip + SCHEDULE_LOOKAHEAD {
            if height == not_height {
                continue;
            }
            if let Some(row) = tally.get(&height) {
                if let Some(best) = row.best_payee() {
                    if best.script == payee_script {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl PaymentVoter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        net: Arc<dyn NetSink>,
        sporks: Arc<SporkSet>,
        params: Arc<ChainParams>,
        sync_flags: Arc<SyncFlags>,
        local: Arc<LocalSnode>,
        cached_height: Arc<AtomicI64>,
    ) -> Self {
        Self {
            tally: Mutex::new(BTreeMap::new()),
            votes: Mutex::new(VoteState::default()),
            chain,
            clock,
            net,
            sporks,
            params,
            sync_flags,
            local,
            cached_height,
        }
    }

    pub fn block_count(&self) -> usize {
        self.tally.lock().expect("tally lock").len()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.lock().expect("votes lock").votes.len()
    }

    pub fn has_verified_vote(&self, hash: &Hash256) -> bool {
        self.votes
            .lock()
            .expect("votes lock")
            .votes
            .get(hash)
            .is_some_and(|(_, verified)| *verified)
    }

    pub fn get_vote(&self, hash: &Hash256) -> Option<PaymentVote> {
        self.votes
            .lock()
            .expect("votes lock")
            .votes
            .get(hash)
            .map(|(vote, _)| vote.clone())
    }

    /// All verified votes targeting one height.
    pub fn votes_for_height(&self, height: i64) -> Vec<PaymentVote> {
        let hashes: Vec<Hash256> = {
            let tally = self.tally.lock().expect("tally lock");
            match tally.get(&height) {
                Some(row) => row
                    .payees
                    .iter()
                    .flat_map(|payee| payee.vote_hashes.iter().copied())
                    .collect(),
                None => return Vec::new(),
            }
        };
        let votes = self.votes.lock().expect("votes lock");
        hashes
            .iter()
            .filter_map(|hash| votes.votes.get(hash))
            .filter(|(_, verified)| *verified)
            .map(|(vote, _)| vote.clone())
            .collect()
    }

    /// Winner script for a height, if any votes exist.
    pub fn get_block_payee(&self, height: i64) -> Option<Vec<u8>> {
        let tally = self.tally.lock().expect("tally lock");
        tally
            .get(&height)
            .and_then(|row| row.best_payee().map(|best| best.script.clone()))
    }

    /// Payees that collected at least `min_votes` at a height; used by the
    /// registry's last-paid scan.
    pub fn payees_with_votes(&self, height: i64, min_votes: usize) -> Vec<Vec<u8>> {
        let tally = self.tally.lock().expect("tally lock");
        tally
            .get(&height)
            .map(|row| row.payees_with_votes(min_votes))
            .unwrap_or_default()
    }

    fn add_or_update_vote(&self, vote: &PaymentVote) -> bool {
        if self
            .chain
            .block_hash(vote.block_height - 101)
            .is_none()
        {
            return false;
        }
        let vote_hash = vote.vote_hash();
        if self.has_verified_vote(&vote_hash) {
            return false;
        }
        let mut tally = self.tally.lock().expect("tally lock");
        let mut votes = self.votes.lock().expect("votes lock");
        votes.votes.insert(vote_hash, (vote.clone(), true));
        tally
            .entry(vote.block_height)
            .or_insert_with(|| BlockPayees::new(vote.block_height))
            .add_vote(&vote.payee_script, vote_hash);
        aurumd_log::log_debug!(
            "payment vote added, height={} voter={}",
            vote.block_height,
            vote.voter_outpoint.to_string_short()
        );
        true
    }

    /// At-most-one vote per voter per height.
    fn update_last_vote(&self, vote: &PaymentVote) -> bool {
        let mut votes = self.votes.lock().expect("votes lock");
        match votes.last_vote_by.get_mut(&vote.voter_outpoint) {
            Some(height) => {
                if *height == vote.block_height {
                    return false;
                }
                *height = vote.block_height;
                true
            }
            None => {
                votes
                    .last_vote_by
                    .insert(vote.voter_outpoint.clone(), vote.block_height);
                true
            }
        }
    }

    /// Ingest a payment vote from gossip or a sync dump.
    pub fn process_vote(
        &self,
        from: Option<(PeerId, SocketAddr)>,
        vote: PaymentVote,
        registry: &Registry,
    ) -> Result<(), Rejection> {
        // ignore payment traffic until the registry is in place
        if !self.sync_flags.is_list_synced() {
            return Ok(());
        }
        let now = self.clock.now();
        let tip = self.cached_height.load(Ordering::Relaxed);
        let hash = vote.vote_hash();

        {
            let mut votes = self.votes.lock().expect("votes lock");
            if let Some((_, verified)) = votes.votes.get(&hash) {
                if *verified {
                    return Ok(());
                }
            }
            // remember it unverified; the checks below promote it
            votes.votes.insert(hash, (vote.clone(), false));
        }

        let first_block = tip - storage_limit(registry.size());
        if vote.block_height < first_block || vote.block_height > tip + VOTE_FUTURE_WINDOW {
            return Err(Rejection::new("payment vote out of range"));
        }

        let Some(info) = registry.get_info(&vote.voter_outpoint) else {
            // can't judge the vote without the voter; ask the sender
            aurumd_log::log_warn!(
                "unknown snode {} voted, requesting its announce",
                vote.voter_outpoint.to_string_short()
            );
            if let Some((peer, _)) = from {
                registry.ask_for_snode(peer, &vote.voter_outpoint);
            }
            return Ok(());
        };

        // historical votes tolerate the older protocol floor
        let min_proto = if vote.block_height > tip {
            min_snode_payment_proto(&self.sporks)
        } else {
            MIN_SNODE_PAYMENT_PROTO_V1
        };
        if info.protocol_version < min_proto {
            return Err(Rejection::new("voter protocol too old"));
        }

        // regular clients only judge ranks for future votes
        if self.local.snode_mode || vote.block_height > tip {
            let rank =
                registry.get_rank_with_proto(&vote.voter_outpoint, vote.block_height - 101, min_proto);
            if rank == -1 {
                return Err(Rejection::new("voter rank not computable"));
            }
            if rank > SNODE_PAYMENT_SIGNATURES_TOTAL as i64 {
                // nodes routinely overestimate their own rank; only a vote
                // far outside the quorum is suspicious
                if rank > 2 * SNODE_PAYMENT_SIGNATURES_TOTAL as i64 && vote.block_height > tip {
                    return Err(Rejection::ban("voter far outside the payment quorum", 20));
                }
                return Err(Rejection::new("voter outside the payment quorum"));
            }
        }

        if vote.verify_signature(&info.operator_pubkey).is_err() {
            // our registry copy may be stale; refresh it either way
            if let Some((peer, _)) = from {
                registry.ask_for_snode(peer, &vote.voter_outpoint);
            }
            if self.sync_flags.is_list_synced() && vote.block_height > tip {
                return Err(Rejection::ban("bad payment vote signature", 20));
            }
            return Err(Rejection::new("bad payment vote signature"));
        }

        if !self.update_last_vote(&vote) {
            return Err(Rejection::new("snode already voted at this height"));
        }

        if self.add_or_update_vote(&vote) {
            if self.sync_flags.is_synced() {
                self.net.relay_inv(Inv {
                    kind: MSG_SNODE_PAYMENT_VOTE,
                    hash,
                });
            }
            self.sync_flags.bump(now);
        }
        Ok(())
    }

    /// Vote for the winner of `block_height` if we sit in its quorum.
    pub fn process_block(&self, block_height: i64, registry: &Registry) -> bool {
        if !self.local.snode_mode || !self.sync_flags.is_list_synced() {
            return false;
        }
        let Some(our_outpoint) = self.local.active_outpoint() else {
            return false;
        };
        let Some(keys) = self.local.keys() else {
            return false;
        };

        let rank = registry.get_rank(&our_outpoint, block_height - 101);
        if rank == -1 {
            aurumd_log::log_debug!("not voting, our snode is unranked");
            return false;
        }
        if rank > SNODE_PAYMENT_SIGNATURES_TOTAL as i64 {
            aurumd_log::log_debug!("not voting, rank {} outside the quorum", rank);
            return false;
        }

        // pay the oldest snode whose collateral and uptime qualify
        let (_, winner) = registry.next_snode_in_queue(block_height, true, self);
        let Some(winner) = winner else {
            aurumd_log::log_error!("failed to find a snode to pay at height {}", block_height);
            return false;
        };

        let mut vote = PaymentVote::new(our_outpoint, block_height, winner.payee_script);
        vote.sign(&keys, self.sporks.new_sigs());

        if self.add_or_update_vote(&vote) {
            self.net.relay_inv(Inv {
                kind: MSG_SNODE_PAYMENT_VOTE,
                hash: vote.vote_hash(),
            });
            return true;
        }
        false
    }

    /// Record quorum members that failed to vote for a recent block.
    pub fn note_missing_votes(&self, block_height: i64, registry: &Registry) {
        if !self.sync_flags.is_winners_synced() {
            return;
        }
        let ranks = registry.get_ranks(block_height - 101);
        let voters: Vec<OutPoint> = self
            .votes_for_height(block_height)
            .into_iter()
            .map(|vote| vote.voter_outpoint)
            .collect();
        let mut votes = self.votes.lock().expect("votes lock");
        for (rank, info) in ranks {
            if rank > SNODE_PAYMENT_SIGNATURES_TOTAL as i64 {
                break;
            }
            if !voters.contains(&info.outpoint) {
                *votes.did_not_vote.entry(info.outpoint).or_insert(0) += 1;
            }
        }
    }

    /// Coinbase validity against the tally for this height.
    pub fn is_transaction_valid(&self, outputs: &[TxOut], height: i64) -> bool {
        let payment = snode_payment(height, total_output_value(outputs), &self.params);
        let tally = self.tally.lock().expect("tally lock");
        match tally.get(&height) {
            Some(row) => row.is_transaction_valid(outputs, payment, self.params.network),
            None => true,
        }
    }

    /// Split the miner output and append the winner payment for a block
    /// template. Falls back to the local election when no quorum exists.
    pub fn fill_block_payee(
        &self,
        outputs: &mut Vec<TxOut>,
        height: i64,
        block_reward: Amount,
        registry: &Registry,
    ) -> Option<TxOut> {
        let payee = match self.get_block_payee(height) {
            Some(payee) => payee,
            None => {
                // no winner votes yet, elect locally and hope for the best
                let (_, winner) = registry.next_snode_in_queue(height, true, self);
                winner?.payee_script
            }
        };

        let payment = snode_payment(height, block_reward, &self.params);
        if payment == 0 || outputs.is_empty() {
            return None;
        }
        outputs[0].value -= payment;
        let payee_out = TxOut::new(payment, payee);
        outputs.push(payee_out.clone());
        aurumd_log::log_info!("snode payment {} filled at height {}", payment, height);
        Some(payee_out)
    }

    /// Serve MNPAYMENTSYNC: votes for upcoming blocks only; older data is
    /// fetched block by block.
    pub fn process_payment_sync(
        &self,
        peer: PeerId,
        peer_addr: SocketAddr,
        fulfilled: &FulfilledRequests,
    ) {
        if !self.sync_flags.is_synced() {
            return;
        }
        let now = self.clock.now();
        if fulfilled.has(peer_addr, "snode-payment-serve") {
            aurumd_log::log_warn!("peer {} already asked for the payment list", peer_addr);
            self.net.misbehave(peer, 20);
            return;
        }
        fulfilled.add(peer_addr, "snode-payment-serve", now);

        let tip = self.cached_height.load(Ordering::Relaxed);
        let mut count = 0;
        let hashes: Vec<Hash256> = {
            let tally = self.tally.lock().expect("tally lock");
            (tip..tip + VOTE_FUTURE_WINDOW)
                .filter_map(|height| tally.get(&height))
                .flat_map(|row| {
                    row.payees
                        .iter()
                        .flat_map(|payee| payee.vote_hashes.iter().copied())
                })
                .collect()
        };
        for hash in hashes {
            if !self.has_verified_vote(&hash) {
                continue;
            }
            self.net.push_inventory(
                peer,
                Inv {
                    kind: MSG_SNODE_PAYMENT_VOTE,
                    hash,
                },
            );
            count += 1;
        }
        self.net.send(
            peer,
            SnodeMessage::SyncStatusCount {
                asset: SYNC_ASSET_VOTES,
                count,
            },
        );
        aurumd_log::log_info!("sent {} payment votes to peer {}", count, peer);
    }

    /// Request tally rows that lack a quorum, batched within INV limits.
    pub fn request_low_data_payment_blocks(&self, peer: PeerId, registry_size: usize) {
        if !self.sync_flags.is_list_synced() {
            return;
        }
        let tip = self.cached_height.load(Ordering::Relaxed);
        let limit = storage_limit(registry_size);
        let max_inv = aurumd_consensus::constants::MAX_INV_SZ;

        let mut to_fetch: Vec<Inv> = Vec::new();
        {
            let tally = self.tally.lock().expect("tally lock");
            for height in ((tip - limit).max(0)..=tip).rev() {
                let needs_data = match tally.get(&height) {
                    None => true,
                    Some(row) => {
                        let enough = row.max_signatures() >= SNODE_PAYMENT_SIGNATURES_REQUIRED
                            || row.total_votes()
                                >= (SNODE_PAYMENT_SIGNATURES_TOTAL
                                    + SNODE_PAYMENT_SIGNATURES_REQUIRED)
                                    / 2;
                        !enough
                    }
                };
                if !needs_data {
                    continue;
                }
                let Some(hash) = self.chain.block_hash(height) else {
                    continue;
                };
                to_fetch.push(Inv {
                    kind: MSG_SNODE_PAYMENT_BLOCK,
                    hash,
                });
            }
        }

        for chunk in to_fetch.chunks(max_inv) {
            aurumd_log::log_info!(
                "asking peer {} for {} payment blocks",
                peer,
                chunk.len()
            );
            self.net.send(peer, SnodeMessage::GetData(chunk.to_vec()));
        }
    }

    /// Drop voting data beyond the storage window.
    pub fn check_and_remove(&self, registry_size: usize) {
        if !self.sync_flags.is_blockchain_synced() {
            return;
        }
        let tip = self.cached_height.load(Ordering::Relaxed);
        let limit = storage_limit(registry_size);

        let mut tally = self.tally.lock().expect("tally lock");
        let mut votes = self.votes.lock().expect("votes lock");
        let mut dropped_heights = Vec::new();
        votes.votes.retain(|_, (vote, _)| {
            if tip - vote.block_height > limit {
                dropped_heights.push(vote.block_height);
                false
            } else {
                true
            }
        });
        for height in dropped_heights {
            tally.remove(&height);
        }
        aurumd_log::log_info!(
            "payments sweep: votes {} blocks {}",
            votes.votes.len(),
            tally.len()
        );
    }

    /// Do we hold enough voting history to stop syncing it?
    pub fn is_enough_data(&self, registry_size: usize) -> bool {
        let limit = storage_limit(registry_size);
        let average_votes =
            (SNODE_PAYMENT_SIGNATURES_TOTAL + SNODE_PAYMENT_SIGNATURES_REQUIRED) / 2;
        self.block_count() as i64 > limit
            && self.vote_count() as i64 > limit * average_votes as i64
    }

    pub fn clear(&self) {
        self.tally.lock().expect("tally lock").clear();
        let mut votes = self.votes.lock().expect("votes lock");
        *votes = VoteState::default();
    }
}

/// Block-level acceptance of the coinbase payee.
#[allow(clippy::too_many_arguments)]
pub fn is_block_payee_valid(
    outputs: &[TxOut],
    height: i64,
    block_reward: Amount,
    voter: &PaymentVoter,
    gov: &dyn GovernanceView,
    sporks: &SporkSet,
    sync_flags: &SyncFlags,
    params: &ChainParams,
) -> bool {
    if !sync_flags.is_synced() {
        // no data to check against, accept the longest chain
        return true;
    }

    if height < params.superblock_start_height {
        // legacy budget era blocks are deeply buried, accept any payee
        return true;
    }

    if sporks.superblocks_enabled() && gov.is_superblock_triggered(height) {
        return gov.is_valid_superblock(outputs, height, block_reward);
    }

    if voter.is_transaction_valid(outputs, height) {
        return true;
    }

    if sporks.payment_enforcement() {
        aurumd_log::log_error!("invalid snode payment detected at height {}", height);
        return false;
    }

    aurumd_log::log_warn!("snode payment enforcement is off, accepting any payee");
    true
}

/// Block-level bound on the coinbase value.
pub fn is_block_value_valid(
    outputs: &[TxOut],
    height: i64,
    block_reward: Amount,
    gov: &dyn GovernanceView,
    sporks: &SporkSet,
    sync_flags: &SyncFlags,
    params: &ChainParams,
) -> Result<(), String> {
    let total = total_output_value(outputs);
    let reward_met = total <= block_reward;

    if height < params.superblock_start_height {
        let offset = height % params.budget_payments_cycle_blocks;
        if height >= params.budget_payments_start_height
            && offset < params.budget_payments_window_blocks
            && !sync_flags.is_synced()
        {
            // inside the old budget window and still syncing, trust peers
            return Ok(());
        }
        if !reward_met {
            return Err(format!(
                "coinbase pays too much at height {height} (actual={total} limit={block_reward})"
            ));
        }
        return Ok(());
    }

    let superblock_height =
        height >= params.superblock_start_height && height % params.superblock_cycle == 0;

    if !sync_flags.is_synced() {
        // without governance data only superblock heights get leeway
        if superblock_height {
            return Ok(());
        }
        if !reward_met {
            return Err(format!(
                "coinbase pays too much at height {height} (actual={total} limit={block_reward})"
            ));
        }
        return Ok(());
    }

    if sporks.superblocks_enabled() && gov.is_superblock_triggered(height) {
        if gov.is_valid_superblock(outputs, height, block_reward) {
            return Ok(());
        }
        return Err(format!("invalid superblock detected at height {height}"));
    }

    if !reward_met {
        return Err(format!(
            "coinbase pays too much at height {height} (actual={total} limit={block_reward})"
        ));
    }
    Ok(())
}
