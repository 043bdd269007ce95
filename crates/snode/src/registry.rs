//! Service-node registry (C1).
//!
//! A self-healing map of collateral-bound identities maintained by gossip.
//! Broadcasts create entries, pings extend them, the periodic sweep
//! expires and removes them, and a peer quorum recovers entries that fell
//! into `NEW_START_REQUIRED`.
//!
//! All chain reads are gathered before the registry lock is taken so the
//! external chain lock always orders first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::constants::PROTOCOL_VERSION;
use aurumd_consensus::{ChainParams, Hash256, Network};
use aurumd_primitives::OutPoint;
use primitive_types::U256;
use secp256k1::PublicKey;

use crate::chain::ChainView;
use crate::clock::Clock;
use crate::entry::{
    ActiveState, CheckContext, CollateralStatus, SnodeEntry, SnodeInfo,
    SNODE_EXPIRATION_SECONDS, SNODE_MIN_BROADCAST_SECONDS, SNODE_MIN_PING_SECONDS,
    SNODE_NEW_ENTRY_GRACE_PER_NODE_SECONDS, SNODE_NEW_START_REQUIRED_SECONDS,
    SNODE_POSE_BAN_MAX_SCORE, SNODE_SENTINEL_PING_MAX_SECONDS,
};
use crate::messages::{SnodeBroadcast, SnodePing, MAX_FUTURE_SIG_TIME, PING_MAX_BLOCK_AGE};
use crate::net::{Inv, NetSink, PeerId, SnodeMessage, MSG_SNODE_ANNOUNCE, MSG_SNODE_PING};
use crate::payments::min_snode_payment_proto;
use crate::signing::script_for_key;
use crate::spork::SporkSet;
use crate::sync::{SyncFlags, SYNC_ASSET_LIST};
use crate::{LocalSnode, Rejection, ScheduleView, SharedRng};

/// Outcome of ingesting a broadcast, for the caller to act on.
#[derive(Clone, Copy, Debug, Default)]
pub struct BroadcastOutcome {
    pub added: bool,
    /// The broadcast names this process; the activator should re-run.
    pub ours: bool,
}

/// Chain facts prefetched for one broadcast, so validation never touches
/// the chain under the registry lock.
struct CollateralFacts {
    status: CollateralStatus,
    confirmations: i64,
    min_conf_block_hash: Option<Hash256>,
    min_conf_block_time: Option<i64>,
}

pub struct Registry {
    state: Mutex<RegistryState>,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    net: Arc<dyn NetSink>,
    sporks: Arc<SporkSet>,
    params: Arc<ChainParams>,
    sync_flags: Arc<SyncFlags>,
    local: Arc<LocalSnode>,
    cached_height: Arc<AtomicI64>,
    rng: Arc<SharedRng>,
    last_paid_scan_height: AtomicI64,
}

#[derive(Default)]
struct RegistryState {
    snodes: BTreeMap<OutPoint, SnodeEntry>,
    seen_broadcasts: HashMap<Hash256, (i64, SnodeBroadcast)>,
    seen_pings: HashMap<Hash256, SnodePing>,
    /// Recovery requests by broadcast hash: reply deadline plus the peers asked.
    recovery_requests: HashMap<Hash256, (i64, HashSet<SocketAddr>)>,
    recovery_good_replies: HashMap<Hash256, Vec<SnodeBroadcast>>,
    scheduled_broadcast_requests: Vec<(SocketAddr, Hash256)>,
    pending_broadcast_requests: HashMap<SocketAddr, (i64, HashSet<Hash256>)>,
    asked_us_for_list: HashMap<SocketAddr, i64>,
    we_asked_for_list: HashMap<SocketAddr, i64>,
    we_asked_for_entry: HashMap<OutPoint, HashMap<SocketAddr, i64>>,
    last_sentinel_ping_time: i64,
    last_queue_seq: u64,
    warned_daemon_updates: bool,
}

impl Registry {
    pub const DSEG_UPDATE_SECONDS: i64 = 3 * 60 * 60;
    pub const LAST_PAID_SCAN_BLOCKS: i64 = 100;

    pub const MNB_RECOVERY_QUORUM_TOTAL: usize = 10;
    pub const MNB_RECOVERY_QUORUM_REQUIRED: usize = 6;
    pub const MNB_RECOVERY_MAX_ASK_ENTRIES: usize = 10;
    pub const MNB_RECOVERY_WAIT_SECONDS: i64 = 60;
    pub const MNB_RECOVERY_RETRY_SECONDS: i64 = 3 * 60 * 60;

    /// Direct connections give the remote this long to respond.
    pub const PENDING_REQUEST_TIMEOUT_SECONDS: i64 = 15;

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
        rng: Arc<SharedRng>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            chain,
            clock,
            net,
            sporks,
            params,
            sync_flags,
            local,
            cached_height,
            rng,
            last_paid_scan_height: AtomicI64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock")
    }

    pub fn size(&self) -> usize {
        self.lock().snodes.len()
    }

    pub fn count_enabled(&self) -> usize {
        self.lock()
            .snodes
            .values()
            .filter(|entry| entry.is_enabled())
            .count()
    }

    pub fn has(&self, outpoint: &OutPoint) -> bool {
        self.lock().snodes.contains_key(outpoint)
    }

    pub fn get_info(&self, outpoint: &OutPoint) -> Option<SnodeInfo> {
        self.lock().snodes.get(outpoint).map(SnodeEntry::info)
    }

    pub fn info_by_operator_key(&self, operator_key: &PublicKey) -> Option<SnodeInfo> {
        self.lock()
            .snodes
            .values()
            .find(|entry| entry.operator_pubkey == *operator_key)
            .map(SnodeEntry::info)
    }

    pub fn info_by_payee(&self, payee_script: &[u8]) -> Option<SnodeInfo> {
        self.lock()
            .snodes
            .values()
            .find(|entry| entry.payee_script() == payee_script)
            .map(SnodeEntry::info)
    }

    pub fn snode_list(&self) -> Vec<SnodeInfo> {
        self.lock().snodes.values().map(SnodeEntry::info).collect()
    }

    pub fn last_queue_seq(&self) -> u64 {
        self.lock().last_queue_seq
    }

    pub fn update_last_sentinel_ping_time(&self) {
        let now = self.clock.now();
        self.lock().last_sentinel_ping_time = now;
    }

    pub fn is_sentinel_ping_active(&self) -> bool {
        let now = self.clock.now();
        let last = self.lock().last_sentinel_ping_time;
        now - last <= SNODE_SENTINEL_PING_MAX_SECONDS
    }

    pub fn allow_mixing(&self, outpoint: &OutPoint) -> bool {
        let mut state = self.lock();
        state.last_queue_seq += 1;
        let seq = state.last_queue_seq;
        match state.snodes.get_mut(outpoint) {
            Some(entry) => {
                entry.last_queue_seq = seq;
                entry.allow_mixing = true;
                true
            }
            None => false,
        }
    }

    pub fn disallow_mixing(&self, outpoint: &OutPoint) -> bool {
        let mut state = self.lock();
        match state.snodes.get_mut(outpoint) {
            Some(entry) => {
                entry.allow_mixing = false;
                true
            }
            None => false,
        }
    }

    pub fn pose_ban(&self, outpoint: &OutPoint) -> bool {
        let mut state = self.lock();
        match state.snodes.get_mut(outpoint) {
            Some(entry) => {
                entry.pose_ban();
                true
            }
            None => false,
        }
    }

    pub fn increase_pose_ban_score(&self, outpoint: &OutPoint) {
        if let Some(entry) = self.lock().snodes.get_mut(outpoint) {
            entry.increase_pose_ban_score();
            aurumd_log::log_debug!(
                "increased PoSe ban score for {} to {}",
                outpoint.to_string_short(),
                entry.pose_ban_score
            );
        }
    }

    pub fn decrease_pose_ban_score(&self, outpoint: &OutPoint) {
        if let Some(entry) = self.lock().snodes.get_mut(outpoint) {
            if !entry.is_pose_verified() {
                entry.decrease_pose_ban_score();
            }
        }
    }

    /// Operator keys of every entry announced from the given address.
    pub fn operator_keys_at_address(&self, addr: SocketAddr) -> Vec<(OutPoint, PublicKey)> {
        self.lock()
            .snodes
            .values()
            .filter(|entry| entry.addr == addr)
            .map(|entry| (entry.outpoint.clone(), entry.operator_pubkey))
            .collect()
    }

    /// Entries considered when hunting address duplicates.
    pub fn same_addr_candidates(&self) -> Vec<(OutPoint, SocketAddr, ActiveState, bool)> {
        self.lock()
            .snodes
            .values()
            .map(|entry| {
                (
                    entry.outpoint.clone(),
                    entry.addr,
                    entry.active_state,
                    entry.is_pose_verified(),
                )
            })
            .collect()
    }

    pub fn add_governance_vote(&self, outpoint: &OutPoint, object_hash: Hash256) -> bool {
        let mut state = self.lock();
        match state.snodes.get_mut(outpoint) {
            Some(entry) => {
                *entry.governance_votes.entry(object_hash).or_insert(0) += 1;
                true
            }
            None => false,
        }
    }

    pub fn remove_governance_object(&self, object_hash: &Hash256) {
        let mut state = self.lock();
        for entry in state.snodes.values_mut() {
            entry.governance_votes.remove(object_hash);
        }
    }

    pub fn is_snode_pinged_within(&self, outpoint: &OutPoint, seconds: i64, at: i64) -> bool {
        self.lock()
            .snodes
            .get(outpoint)
            .is_some_and(|entry| entry.is_pinged_within(seconds, at))
    }

    /// Install the ping the local activator just minted.
    pub fn set_snode_last_ping(&self, outpoint: &OutPoint, ping: &SnodePing) {
        let new_sigs = self.sporks.new_sigs();
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(entry) = state.snodes.get_mut(outpoint) else {
            return;
        };
        entry.last_ping = Some(ping.clone());
        let mnb_hash = entry.to_broadcast().dedup_hash();
        if ping.sentinel_is_current {
            state.last_sentinel_ping_time = now;
        }
        state.seen_pings.insert(ping.hash(new_sigs), ping.clone());
        if let Some((_, seen)) = state.seen_broadcasts.get_mut(&mnb_hash) {
            seen.last_ping = ping.clone();
        }
    }

    fn collateral_facts(&self, mnb: &SnodeBroadcast) -> CollateralFacts {
        let Some(utxo) = self.chain.utxo(&mnb.outpoint) else {
            return CollateralFacts {
                status: CollateralStatus::UtxoNotFound,
                confirmations: 0,
                min_conf_block_hash: None,
                min_conf_block_time: None,
            };
        };

        let status = if utxo.value != self.params.snode.collateral_amount {
            CollateralStatus::InvalidAmount
        } else if utxo.script_pubkey != script_for_key(&mnb.collateral_pubkey) {
            CollateralStatus::InvalidPubkey
        } else {
            CollateralStatus::Ok
        };

        let confirmations = self.chain.tip_height() - utxo.height + 1;
        let min_conf_height = utxo.height + self.params.snode.min_confirmations - 1;
        CollateralFacts {
            status,
            confirmations,
            min_conf_block_hash: self.chain.block_hash(min_conf_height),
            min_conf_block_time: self.chain.block_time(min_conf_height),
        }
    }

    fn is_valid_net_addr(&self, addr: &SocketAddr) -> bool {
        if self.params.network == Network::Regtest {
            return true;
        }
        match addr.ip() {
            std::net::IpAddr::V4(ip) => {
                !ip.is_loopback() && !ip.is_private() && !ip.is_unspecified() && !ip.is_broadcast()
            }
            std::net::IpAddr::V6(_) => false,
        }
    }

    fn port_rule_ok(&self, addr: &SocketAddr) -> bool {
        if self.params.allow_multiple_ports {
            return true;
        }
        let mainnet_port = aurumd_consensus::chain_params(Network::Mainnet).default_port;
        if self.params.network == Network::Mainnet {
            addr.port() == mainnet_port
        } else {
            addr.port() != mainnet_port
        }
    }

    /// Stateless checks a broadcast must pass before anything else.
    /// Returns the state the entry starts in.
    fn simple_check_broadcast(
        &self,
        mnb: &SnodeBroadcast,
        ping_block_known: bool,
        adjusted_now: i64,
    ) -> Result<ActiveState, Rejection> {
        if !self.is_valid_net_addr(&mnb.addr) {
            return Err(Rejection::new("invalid snode address"));
        }
        if mnb.sig_time > adjusted_now + MAX_FUTURE_SIG_TIME {
            return Err(Rejection::ban(
                "announce signature too far into the future",
                1,
            ));
        }

        if script_for_key(&mnb.collateral_pubkey).len() != 25
            || script_for_key(&mnb.operator_pubkey).len() != 25
        {
            return Err(Rejection::ban(
                "announce pubkey script has the wrong size",
                100,
            ));
        }

        if !self.port_rule_ok(&mnb.addr) {
            return Err(Rejection::new("announce port not allowed on this network"));
        }

        let ping_ok =
            ping_block_known && mnb.last_ping.sig_time <= adjusted_now + MAX_FUTURE_SIG_TIME;
        if !ping_ok {
            if mnb.recovery {
                // quorum replies may carry stale pings; the entry starts
                // expired and must earn its way back
                return Ok(ActiveState::Expired);
            }
            return Err(Rejection::new("announce carries an invalid ping"));
        }

        if mnb.protocol_version < min_snode_payment_proto(&self.sporks) {
            return Ok(ActiveState::UpdateRequired);
        }

        Ok(ActiveState::Enabled)
    }

    /// Bookkeeping for a broadcast we have already seen, including the
    /// recovery-reply tally.
    fn note_seen_broadcast(
        &self,
        state: &mut RegistryState,
        hash: &Hash256,
        from: Option<(PeerId, SocketAddr)>,
        mnb: &SnodeBroadcast,
        now: i64,
    ) {
        let Some((seen_at, seen_mnb)) = state.seen_broadcasts.get(hash) else {
            return;
        };
        let seen_at = *seen_at;
        let seen_ping_time = seen_mnb.last_ping.sig_time;

        // refresh the seen time when the entry is close to falling into a
        // non-recoverable state
        if now - seen_at > SNODE_NEW_START_REQUIRED_SECONDS - SNODE_MIN_PING_SECONDS * 2 {
            if let Some(seen) = state.seen_broadcasts.get_mut(hash) {
                seen.0 = now;
            }
            self.sync_flags.bump(now);
        }

        let Some((_, peer_addr)) = from else {
            return;
        };
        let sentinel = state.last_sentinel_ping_time;
        let size = state.snodes.len();
        let in_recovery = match state.recovery_requests.get_mut(hash) {
            // one reply per asked peer only
            Some((deadline, asked)) => now < *deadline && asked.remove(&peer_addr),
            None => false,
        };
        if !in_recovery || mnb.last_ping.sig_time <= seen_ping_time {
            return;
        }
        let mut probe = SnodeEntry::from_broadcast(mnb);
        probe.check(&self.check_context(now, true, sentinel, size, true));
        if probe.active_state.is_recoverable() {
            state
                .recovery_good_replies
                .entry(*hash)
                .or_default()
                .push(mnb.clone());
        }
    }

    /// Ingest a broadcast from gossip, a sync dump, or quorum recovery.
    pub fn process_broadcast(
        &self,
        from: Option<(PeerId, SocketAddr)>,
        mnb: SnodeBroadcast,
    ) -> Result<BroadcastOutcome, Rejection> {
        let now = self.clock.now();
        let adjusted_now = self.clock.adjusted_now();
        let new_sigs = self.sporks.new_sigs();
        let hash = mnb.dedup_hash();
        let ping_block_known = self.chain.block_height(&mnb.last_ping.block_hash).is_some();
        let facts = self.collateral_facts(&mnb);

        let mut outcome = BroadcastOutcome::default();
        let mut relay_hash = None;

        {
            let mut state = self.lock();

            if state.seen_broadcasts.contains_key(&hash) && !mnb.recovery {
                self.note_seen_broadcast(&mut state, &hash, from, &mnb, now);
                return Ok(outcome);
            }
            state.seen_broadcasts.insert(hash, (now, mnb.clone()));

            let initial_state = self.simple_check_broadcast(&mnb, ping_block_known, adjusted_now)?;

            let ours = self
                .local
                .operator_pubkey()
                .is_some_and(|key| key == mnb.operator_pubkey);

            if state.snodes.contains_key(&mnb.outpoint) {
                let old_seen_hash = {
                    let entry = state.snodes.get(&mnb.outpoint).expect("entry exists");
                    if entry.sig_time == mnb.sig_time && !mnb.recovery {
                        // legit duplicate right after startup, nothing to do
                        return Ok(outcome);
                    }
                    if entry.sig_time > mnb.sig_time {
                        return Err(Rejection::new("announce older than the known entry"));
                    }
                    if entry.is_pose_banned() {
                        return Err(Rejection::new("announce for a PoSe-banned snode"));
                    }
                    if entry.collateral_pubkey != mnb.collateral_pubkey {
                        return Err(Rejection::ban("announce changes the collateral key", 33));
                    }
                    entry.to_broadcast().dedup_hash()
                };
                mnb.verify_signature()?;

                let recently_broadcast = state
                    .snodes
                    .get(&mnb.outpoint)
                    .is_some_and(|entry| entry.is_broadcasted_within(SNODE_MIN_BROADCAST_SECONDS, now));
                if !recently_broadcast || ours {
                    let sentinel = state.last_sentinel_ping_time;
                    let size = state.snodes.len();
                    if let Some(entry) = state.snodes.get_mut(&mnb.outpoint) {
                        entry.operator_pubkey = mnb.operator_pubkey;
                        entry.sig_time = mnb.sig_time;
                        entry.sig = mnb.sig.clone();
                        entry.protocol_version = mnb.protocol_version;
                        entry.addr = mnb.addr;
                        entry.pose_ban_score = if ours { -SNODE_POSE_BAN_MAX_SCORE } else { 0 };
                        entry.pose_ban_until_height = 0;
                        entry.active_state = initial_state;
                        if ping_block_known {
                            entry.last_ping = Some(mnb.last_ping.clone());
                        }
                    }
                    if ping_block_known {
                        state
                            .seen_pings
                            .insert(mnb.last_ping.hash(new_sigs), mnb.last_ping.clone());
                    }
                    if ours {
                        if mnb.protocol_version == PROTOCOL_VERSION {
                            outcome.ours = true;
                        } else {
                            aurumd_log::log_warn!(
                                "announce for our snode carries protocol {} instead of {}, re-activate it",
                                mnb.protocol_version,
                                PROTOCOL_VERSION
                            );
                            return Err(Rejection::new("our announce has the wrong protocol"));
                        }
                    }
                    let ctx = self.check_context(
                        now,
                        facts.status == CollateralStatus::Ok,
                        sentinel,
                        size,
                        true,
                    );
                    if let Some(entry) = state.snodes.get_mut(&mnb.outpoint) {
                        entry.check(&ctx);
                    }
                    aurumd_log::log_info!("updated snode entry addr={}", mnb.addr);
                    relay_hash = Some(hash);
                    self.sync_flags.bump(now);
                }

                if hash != old_seen_hash {
                    state.seen_broadcasts.remove(&old_seen_hash);
                }
            } else {
                // brand-new outpoint: full collateral validation
                if ours && self.local.active_outpoint() == Some(mnb.outpoint.clone()) {
                    // our own broadcast bouncing back, nothing to do
                    return Ok(outcome);
                }

                match facts.status {
                    CollateralStatus::UtxoNotFound => {
                        return Err(Rejection::new("snode collateral not found"));
                    }
                    CollateralStatus::InvalidAmount => {
                        return Err(Rejection::ban("snode collateral has the wrong value", 33));
                    }
                    CollateralStatus::InvalidPubkey => {
                        return Err(Rejection::ban(
                            "snode collateral does not pay the collateral key",
                            33,
                        ));
                    }
                    CollateralStatus::Ok => {}
                }
                if facts.confirmations < self.params.snode.min_confirmations {
                    // legit but young; drop the seen record so the
                    // broadcast gets a second look later
                    state.seen_broadcasts.remove(&hash);
                    return Err(Rejection::new("snode collateral too shallow"));
                }
                let Some(min_conf_hash) = facts.min_conf_block_hash else {
                    state.seen_broadcasts.remove(&hash);
                    return Err(Rejection::new("snode collateral depth block unknown"));
                };
                if facts
                    .min_conf_block_time
                    .is_some_and(|time| time > mnb.sig_time)
                {
                    return Err(Rejection::new(
                        "announce predates the collateral confirmation block",
                    ));
                }
                mnb.verify_signature()?;

                let mut entry = SnodeEntry::from_broadcast(&mnb);
                entry.active_state = initial_state;
                entry.collateral_min_conf_block_hash = min_conf_hash;
                if !ping_block_known {
                    entry.last_ping = None;
                }
                if ping_block_known {
                    state
                        .seen_pings
                        .insert(mnb.last_ping.hash(new_sigs), mnb.last_ping.clone());
                }
                if ours {
                    entry.pose_ban_score = -SNODE_POSE_BAN_MAX_SCORE;
                    if mnb.protocol_version != PROTOCOL_VERSION {
                        aurumd_log::log_warn!(
                            "announce for our snode carries protocol {} instead of {}, re-activate it",
                            mnb.protocol_version,
                            PROTOCOL_VERSION
                        );
                        state.snodes.insert(mnb.outpoint.clone(), entry);
                        return Err(Rejection::new("our announce has the wrong protocol"));
                    }
                    outcome.ours = true;
                }
                aurumd_log::log_info!(
                    "adding new snode {} addr={}",
                    mnb.outpoint.to_string_short(),
                    mnb.addr
                );
                state.snodes.insert(mnb.outpoint.clone(), entry);
                outcome.added = true;
                relay_hash = Some(hash);
                self.sync_flags.bump(now);
            }
        }

        if let Some(hash) = relay_hash {
            if self.sync_flags.is_synced() {
                self.net.relay_inv(Inv {
                    kind: MSG_SNODE_ANNOUNCE,
                    hash,
                });
            }
        }
        Ok(outcome)
    }

    /// Ingest a standalone ping.
    pub fn process_ping(&self, from: Option<PeerId>, mnp: SnodePing) -> Result<(), Rejection> {
        let now = self.clock.now();
        let adjusted_now = self.clock.adjusted_now();
        let new_sigs = self.sporks.new_sigs();
        let hash = mnp.hash(new_sigs);
        let ping_block_height = self.chain.block_height(&mnp.block_hash);
        let tip = self.chain.tip_height();
        let collateral_unspent = self.chain.utxo(&mnp.outpoint).is_some();

        let mut ask_for_entry = false;
        let mut relay = false;

        {
            let mut state = self.lock();

            if state.seen_pings.contains_key(&hash) {
                return Ok(());
            }
            state.seen_pings.insert(hash, mnp.clone());

            if mnp.sig_time > adjusted_now + MAX_FUTURE_SIG_TIME {
                return Err(Rejection::ban("ping signature too far into the future", 1));
            }

            if state.snodes.contains_key(&mnp.outpoint) && mnp.sentinel_is_current {
                state.last_sentinel_ping_time = now;
            }

            match state.snodes.get(&mnp.outpoint) {
                None => {
                    // unknown snode, ask the sender for its announce
                    ask_for_entry = from.is_some();
                }
                Some(entry) => {
                    if entry.active_state == ActiveState::NewStartRequired {
                        return Err(Rejection::new("ping for a snode requiring a new start"));
                    }
                    if entry.active_state == ActiveState::UpdateRequired {
                        return Err(Rejection::new("ping for an outdated snode"));
                    }

                    let Some(ping_height) = ping_block_height else {
                        return Err(Rejection::new("ping references an unknown block"));
                    };
                    if tip - ping_height > PING_MAX_BLOCK_AGE {
                        return Err(Rejection::new(
                            "ping references a block too deep in the chain",
                        ));
                    }

                    if entry.is_pinged_within(SNODE_MIN_PING_SECONDS - 60, mnp.sig_time) {
                        return Err(Rejection::new("ping arrived too early"));
                    }

                    mnp.verify_signature(&entry.operator_pubkey)?;

                    if !self.sync_flags.is_list_synced()
                        && !entry.is_pinged_within(SNODE_EXPIRATION_SECONDS / 2, now)
                    {
                        self.sync_flags.bump(now);
                    }

                    let mnb_hash = entry.to_broadcast().dedup_hash();
                    let sentinel = state.last_sentinel_ping_time;
                    let size = state.snodes.len();
                    let ctx = self.check_context(now, collateral_unspent, sentinel, size, true);
                    if let Some(entry) = state.snodes.get_mut(&mnp.outpoint) {
                        entry.last_ping = Some(mnp.clone());
                        entry.check(&ctx);
                        relay = matches!(
                            entry.active_state,
                            ActiveState::Enabled
                                | ActiveState::Expired
                                | ActiveState::SentinelPingExpired
                        );
                    }
                    if let Some((_, seen)) = state.seen_broadcasts.get_mut(&mnb_hash) {
                        seen.last_ping = mnp.clone();
                    }
                }
            }
        }

        if ask_for_entry {
            if let Some(peer) = from {
                self.ask_for_snode(peer, &mnp.outpoint);
            }
            return Ok(());
        }

        if relay && self.sync_flags.is_synced() {
            self.net.relay_inv(Inv {
                kind: MSG_SNODE_PING,
                hash,
            });
        }
        Ok(())
    }

    /// Request a single entry from a peer, at most once per window.
    pub fn ask_for_snode(&self, peer: PeerId, outpoint: &OutPoint) {
        let now = self.clock.now();
        let Some(peer_addr) = self
            .net
            .peers()
            .into_iter()
            .find(|info| info.id == peer)
            .map(|info| info.addr)
        else {
            return;
        };
        {
            let mut state = self.lock();
            let asked = state.we_asked_for_entry.entry(outpoint.clone()).or_default();
            if let Some(until) = asked.get(&peer_addr) {
                if now < *until {
                    return;
                }
            }
            asked.insert(peer_addr, now + Self::DSEG_UPDATE_SECONDS);
        }
        aurumd_log::log_debug!(
            "asking peer {} for missing snode entry {}",
            peer_addr,
            outpoint.to_string_short()
        );
        self.net
            .send(peer, SnodeMessage::Dseg(Some(outpoint.clone())));
    }

    /// Request the full registry from a peer during sync.
    pub fn dseg_update(&self, peer: PeerId, peer_addr: SocketAddr) {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            if self.params.network == Network::Mainnet {
                if let Some(until) = state.we_asked_for_list.get(&peer_addr) {
                    if now < *until {
                        aurumd_log::log_debug!("we already asked {} for the list", peer_addr);
                        return;
                    }
                }
            }
            state
                .we_asked_for_list
                .insert(peer_addr, now + Self::DSEG_UPDATE_SECONDS);
        }
        self.net.send(peer, SnodeMessage::Dseg(None));
    }

    /// Serve a DSEG request.
    pub fn process_dseg(&self, peer: PeerId, peer_addr: SocketAddr, outpoint: Option<OutPoint>) {
        // serving the list is heavy, refuse until fully synced
        if !self.sync_flags.is_synced() {
            return;
        }
        match outpoint {
            Some(outpoint) => self.sync_single(peer, &outpoint),
            None => self.sync_all(peer, peer_addr),
        }
    }

    fn push_dseg_invs(
        &self,
        peer: PeerId,
        entry_mnb: SnodeBroadcast,
        now: i64,
        state: &mut RegistryState,
    ) {
        let new_sigs = self.sporks.new_sigs();
        let mnb_hash = entry_mnb.dedup_hash();
        let mnp = entry_mnb.last_ping.clone();
        let mnp_hash = mnp.hash(new_sigs);
        self.net.push_inventory(
            peer,
            Inv {
                kind: MSG_SNODE_ANNOUNCE,
                hash: mnb_hash,
            },
        );
        self.net.push_inventory(
            peer,
            Inv {
                kind: MSG_SNODE_PING,
                hash: mnp_hash,
            },
        );
        state.seen_broadcasts.entry(mnb_hash).or_insert((now, entry_mnb));
        state.seen_pings.entry(mnp_hash).or_insert(mnp);
    }

    fn sync_single(&self, peer: PeerId, outpoint: &OutPoint) {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(entry) = state.snodes.get(outpoint) else {
            return;
        };
        if is_local_address(&entry.addr) {
            return;
        }
        // send regardless of state, peers need stale entries to verify old votes
        let mnb = entry.to_broadcast();
        self.push_dseg_invs(peer, mnb, now, &mut state);
        aurumd_log::log_info!("sent 1 snode inv to peer {}", peer);
    }

    fn sync_all(&self, peer: PeerId, peer_addr: SocketAddr) {
        let now = self.clock.now();
        let is_local = is_local_address(&peer_addr);
        let mut state = self.lock();
        if !is_local && self.params.network == Network::Mainnet {
            if let Some(until) = state.asked_us_for_list.get(&peer_addr) {
                if now < *until {
                    aurumd_log::log_warn!("peer {} already asked for the snode list", peer_addr);
                    self.net.misbehave(peer, 34);
                    return;
                }
            }
            state
                .asked_us_for_list
                .insert(peer_addr, now + Self::DSEG_UPDATE_SECONDS);
        }

        let broadcasts: Vec<SnodeBroadcast> = state
            .snodes
            .values()
            .filter(|entry| !is_local_address(&entry.addr))
            .map(SnodeEntry::to_broadcast)
            .collect();
        let count = broadcasts.len();
        for mnb in broadcasts {
            self.push_dseg_invs(peer, mnb, now, &mut state);
        }
        self.net.send(
            peer,
            SnodeMessage::SyncStatusCount {
                asset: SYNC_ASSET_LIST,
                count: count as i32,
            },
        );
        aurumd_log::log_info!("sent {} snode invs to peer {}", count, peer);
    }

    /// Serve a GETDATA for a broadcast or ping we have announced.
    pub fn get_data(&self, inv: &Inv) -> Option<SnodeMessage> {
        let state = self.lock();
        match inv.kind {
            MSG_SNODE_ANNOUNCE => state
                .seen_broadcasts
                .get(&inv.hash)
                .map(|(_, mnb)| SnodeMessage::Announce(mnb.clone())),
            MSG_SNODE_PING => state
                .seen_pings
                .get(&inv.hash)
                .map(|mnp| SnodeMessage::Ping(mnp.clone())),
            _ => None,
        }
    }

    fn check_context(
        &self,
        now: i64,
        collateral_unspent: bool,
        last_sentinel_ping_time: i64,
        registry_size: usize,
        force: bool,
    ) -> CheckContext<'_> {
        let sentinel_active = self.sync_flags.is_synced()
            && now - last_sentinel_ping_time <= SNODE_SENTINEL_PING_MAX_SECONDS;
        CheckContext {
            now,
            height: self.cached_height.load(Ordering::Relaxed),
            collateral_unspent,
            sentinel_active,
            min_payment_proto: min_snode_payment_proto(&self.sporks),
            registry_size,
            network: self.params.network,
            list_synced: self.sync_flags.is_list_synced(),
            local_operator_key: self.local.operator_pubkey_ref(),
            local_protocol_version: PROTOCOL_VERSION,
            force,
        }
    }

    /// Run the lifecycle check over every entry.
    pub fn check_all(&self) {
        let now = self.clock.now();
        let outpoints: Vec<OutPoint> = self.lock().snodes.keys().cloned().collect();
        let mut unspent = HashMap::with_capacity(outpoints.len());
        for outpoint in &outpoints {
            unspent.insert(outpoint.clone(), self.chain.utxo(outpoint).is_some());
        }

        let mut state = self.lock();
        let sentinel = state.last_sentinel_ping_time;
        let size = state.snodes.len();
        for outpoint in outpoints {
            let collateral_unspent = unspent.get(&outpoint).copied().unwrap_or(false);
            let ctx = self.check_context(now, collateral_unspent, sentinel, size, false);
            if let Some(entry) = state.snodes.get_mut(&outpoint) {
                entry.check(&ctx);
            }
        }
    }

    /// Periodic sweep: drop spent entries, launch quorum recovery for
    /// `NEW_START_REQUIRED` ones, expire bookkeeping maps.
    pub fn check_and_remove(&self) {
        if !self.sync_flags.is_list_synced() {
            return;
        }

        self.check_all();

        let now = self.clock.now();
        let tip = self.cached_height.load(Ordering::Relaxed);
        // quorum composition is randomized by ranking at a random height
        let random_height = self.rng.below_i64(tip.max(1));
        let ranked = self.get_ranks(random_height);

        let mut reprocess = Vec::new();
        {
            let mut state = self.lock();
            let mut removed = Vec::new();
            for (outpoint, entry) in &state.snodes {
                if entry.active_state == ActiveState::OutpointSpent {
                    removed.push((outpoint.clone(), entry.to_broadcast().dedup_hash()));
                }
            }
            for (outpoint, mnb_hash) in removed {
                aurumd_log::log_info!("removing spent snode {}", outpoint.to_string_short());
                state.seen_broadcasts.remove(&mnb_hash);
                state.we_asked_for_entry.remove(&outpoint);
                state.snodes.remove(&outpoint);
            }

            // schedule recovery for entries in a non-recoverable state
            if self.sync_flags.is_synced() && !ranked.is_empty() {
                let mut asks_left = Self::MNB_RECOVERY_MAX_ASK_ENTRIES;
                let candidates: Vec<(OutPoint, Hash256)> = state
                    .snodes
                    .values()
                    .filter(|entry| entry.active_state == ActiveState::NewStartRequired)
                    .map(|entry| (entry.outpoint.clone(), entry.to_broadcast().dedup_hash()))
                    .collect();
                for (outpoint, hash) in candidates {
                    if asks_left == 0 {
                        break;
                    }
                    if state.recovery_requests.contains_key(&hash) {
                        continue;
                    }
                    let mut asked = HashSet::new();
                    for (_, info) in &ranked {
                        if asked.len() >= Self::MNB_RECOVERY_QUORUM_TOTAL {
                            break;
                        }
                        let already_asked = state
                            .we_asked_for_entry
                            .get(&outpoint)
                            .is_some_and(|peers| peers.contains_key(&info.addr));
                        if already_asked {
                            continue;
                        }
                        asked.insert(info.addr);
                        state.scheduled_broadcast_requests.push((info.addr, hash));
                    }
                    if !asked.is_empty() {
                        aurumd_log::log_debug!(
                            "recovery initiated for snode {}",
                            outpoint.to_string_short()
                        );
                        asks_left -= 1;
                        state
                            .recovery_requests
                            .insert(hash, (now + Self::MNB_RECOVERY_WAIT_SECONDS, asked));
                    }
                }
            }

            // tally recovery replies once their window closed
            let closed: Vec<Hash256> = state
                .recovery_good_replies
                .keys()
                .filter(|hash| {
                    state
                        .recovery_requests
                        .get(*hash)
                        .map_or(true, |(deadline, _)| *deadline < now)
                })
                .cloned()
                .collect();
            for hash in closed {
                if let Some(replies) = state.recovery_good_replies.remove(&hash) {
                    if replies.len() >= Self::MNB_RECOVERY_QUORUM_REQUIRED {
                        let mut best = replies[0].clone();
                        best.recovery = true;
                        aurumd_log::log_debug!(
                            "reprocessing recovered snode {}",
                            best.outpoint.to_string_short()
                        );
                        reprocess.push(best);
                    }
                }
            }

            // allow a new recovery round after the retry window
            state
                .recovery_requests
                .retain(|_, (deadline, _)| now - *deadline <= Self::MNB_RECOVERY_RETRY_SECONDS);

            state.asked_us_for_list.retain(|_, until| *until > now);
            state.we_asked_for_list.retain(|_, until| *until > now);
            state.we_asked_for_entry.retain(|_, peers| {
                peers.retain(|_, until| *until > now);
                !peers.is_empty()
            });
            state.seen_pings.retain(|_, ping| !ping.is_expired(now));

            aurumd_log::log_info!(
                "registry sweep: snodes {} seen_mnb {} seen_mnp {} recovery {}",
                state.snodes.len(),
                state.seen_broadcasts.len(),
                state.seen_pings.len(),
                state.recovery_requests.len()
            );
        }

        for mnb in reprocess {
            if let Err(err) = self.process_broadcast(None, mnb) {
                aurumd_log::log_debug!("recovered announce rejected: {}", err.reason);
            }
        }
    }

    /// Pop the next scheduled direct broadcast request, merged per address.
    fn pop_scheduled_broadcast_request(&self) -> Option<(SocketAddr, HashSet<Hash256>)> {
        let mut state = self.lock();
        if state.scheduled_broadcast_requests.is_empty() {
            return None;
        }
        state.scheduled_broadcast_requests.sort();
        let addr = state.scheduled_broadcast_requests[0].0;
        let mut hashes = HashSet::new();
        state.scheduled_broadcast_requests.retain(|(request_addr, hash)| {
            if *request_addr == addr {
                hashes.insert(*hash);
                false
            } else {
                true
            }
        });
        Some((addr, hashes))
    }

    /// Drive the direct-connection queue for recovery requests.
    pub fn process_pending_broadcast_requests(&self) {
        let now = self.clock.now();
        if let Some((addr, hashes)) = self.pop_scheduled_broadcast_request() {
            if self.net.is_connected(addr).is_none() {
                self.net.connect(addr);
            }
            let mut state = self.lock();
            state.pending_broadcast_requests.insert(addr, (now, hashes));
        }

        let pending: Vec<(SocketAddr, HashSet<Hash256>)> = {
            let state = self.lock();
            state
                .pending_broadcast_requests
                .iter()
                .map(|(addr, (_, hashes))| (*addr, hashes.clone()))
                .collect()
        };

        let mut done = Vec::new();
        for (addr, hashes) in pending {
            if let Some(peer) = self.net.is_connected(addr) {
                let invs: Vec<Inv> = hashes
                    .iter()
                    .map(|hash| Inv {
                        kind: MSG_SNODE_ANNOUNCE,
                        hash: *hash,
                    })
                    .collect();
                self.net.send(peer, SnodeMessage::GetData(invs));
                done.push(addr);
            }
        }

        let mut state = self.lock();
        state.pending_broadcast_requests.retain(|addr, (added, _)| {
            if done.contains(addr) {
                return false;
            }
            if now - *added > Self::PENDING_REQUEST_TIMEOUT_SECONDS {
                aurumd_log::log_debug!("failed to connect to {} for snode recovery", addr);
                return false;
            }
            true
        });
    }

    fn scores(&self, block_hash: &Hash256, min_proto: i32) -> Vec<(U256, SnodeInfo)> {
        let state = self.lock();
        let mut scored: Vec<(U256, SnodeInfo)> = state
            .snodes
            .values()
            .filter(|entry| entry.protocol_version >= min_proto)
            // banned entries neither rank nor get paid
            .filter(|entry| !entry.is_pose_banned())
            .map(|entry| (entry.calculate_score(block_hash), entry.info()))
            .collect();
        // highest score first, ties broken by outpoint order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.outpoint.cmp(&b.1.outpoint)));
        scored
    }

    /// Rank of one snode at a height; -1 when it cannot be computed.
    pub fn get_rank(&self, outpoint: &OutPoint, height: i64) -> i64 {
        self.get_rank_with_proto(outpoint, height, min_snode_payment_proto(&self.sporks))
    }

    pub fn get_rank_with_proto(&self, outpoint: &OutPoint, height: i64, min_proto: i32) -> i64 {
        if !self.sync_flags.is_list_synced() {
            return -1;
        }
        let Some(block_hash) = self.chain.block_hash(height) else {
            aurumd_log::log_warn!("rank query failed, unknown block at height {}", height);
            return -1;
        };
        for (rank, (_, info)) in self.scores(&block_hash, min_proto).iter().enumerate() {
            if info.outpoint == *outpoint {
                return rank as i64 + 1;
            }
        }
        -1
    }

    /// Full ranking for a height, best rank first.
    pub fn get_ranks(&self, height: i64) -> Vec<(i64, SnodeInfo)> {
        self.get_ranks_with_proto(height, min_snode_payment_proto(&self.sporks))
    }

    pub fn get_ranks_with_proto(&self, height: i64, min_proto: i32) -> Vec<(i64, SnodeInfo)> {
        if !self.sync_flags.is_list_synced() {
            return Vec::new();
        }
        let Some(block_hash) = self.chain.block_hash(height) else {
            return Vec::new();
        };
        self.scores(&block_hash, min_proto)
            .into_iter()
            .enumerate()
            .map(|(idx, (_, info))| (idx as i64 + 1, info))
            .collect()
    }

    /// Deterministic choice of the snode owed the payment at a height.
    pub fn next_snode_in_queue(
        &self,
        block_height: i64,
        filter_sig_time: bool,
        schedule: &dyn ScheduleView,
    ) -> (usize, Option<SnodeInfo>) {
        if !self.sync_flags.is_winners_synced() {
            return (0, None);
        }
        let Some(score_hash) = self.chain.block_hash(block_height - 101) else {
            aurumd_log::log_warn!(
                "next-payee query failed, no block hash at {}",
                block_height - 101
            );
            return (0, None);
        };
        let adjusted_now = self.clock.adjusted_now();
        let min_proto = min_snode_payment_proto(&self.sporks);

        struct Candidate {
            info: SnodeInfo,
            sig_time: i64,
            last_paid_block: i64,
            score: U256,
        }

        let (registry_size, raw): (usize, Vec<Candidate>) = {
            let state = self.lock();
            let size = state.snodes.len();
            let raw = state
                .snodes
                .values()
                .filter(|entry| entry.is_valid_for_payment())
                .filter(|entry| entry.protocol_version >= min_proto)
                .map(|entry| Candidate {
                    info: entry.info(),
                    sig_time: entry.sig_time,
                    last_paid_block: entry.last_paid_block,
                    score: entry.calculate_score(&score_hash),
                })
                .collect();
            (size, raw)
        };

        let mut candidates: Vec<Candidate> = Vec::with_capacity(raw.len());
        for candidate in raw {
            // scheduled in the propagation window already
            if schedule.is_scheduled(&candidate.info.payee_script, block_height) {
                continue;
            }
            // too new, wait for a cycle
            if filter_sig_time
                && candidate.sig_time
                    + registry_size as i64 * SNODE_NEW_ENTRY_GRACE_PER_NODE_SECONDS
                    > adjusted_now
            {
                continue;
            }
            // collateral must be at least as deep as the list is long
            let confirmations =
                crate::chain::utxo_confirmations(self.chain.as_ref(), &candidate.info.outpoint)
                    .unwrap_or(0);
            if confirmations < registry_size as i64 {
                continue;
            }
            candidates.push(candidate);
        }

        let count = candidates.len();
        // while the network upgrades, do not punish freshly restarted nodes
        if filter_sig_time && count < registry_size / 3 {
            return self.next_snode_in_queue(block_height, false, schedule);
        }

        candidates.sort_by(|a, b| {
            a.last_paid_block
                .cmp(&b.last_paid_block)
                .then_with(|| a.info.outpoint.cmp(&b.info.outpoint))
        });

        // look at the oldest tenth and pay the best-scoring one
        let tenth = (registry_size / 10).max(1);
        let best = candidates.into_iter().take(tenth).max_by(|a, b| {
            a.score
                .cmp(&b.score)
                .then_with(|| b.info.outpoint.cmp(&a.info.outpoint))
        });

        (count, best.map(|candidate| candidate.info))
    }

    /// Refresh `last_paid` from recent payee tallies (snode mode only).
    pub fn update_last_paid(&self, payees: &dyn Fn(i64) -> Vec<Vec<u8>>, storage_limit: i64) {
        if !self.sync_flags.is_winners_synced() {
            return;
        }
        let tip = self.cached_height.load(Ordering::Relaxed);
        let last_run = self.last_paid_scan_height.swap(tip, Ordering::Relaxed);
        let scan_back = (tip - last_run)
            .max(Self::LAST_PAID_SCAN_BLOCKS)
            .min(storage_limit);

        let mut block_times = HashMap::new();
        for height in (tip - scan_back).max(0)..=tip {
            if let Some(time) = self.chain.block_time(height) {
                block_times.insert(height, time);
            }
        }

        let mut state = self.lock();
        for height in (tip - scan_back).max(0)..=tip {
            let winners = payees(height);
            if winners.is_empty() {
                continue;
            }
            for entry in state.snodes.values_mut() {
                if entry.last_paid_block >= height {
                    continue;
                }
                let payee = entry.payee_script();
                if winners.iter().any(|script| *script == payee) {
                    entry.last_paid_block = height;
                    entry.last_paid_time = block_times.get(&height).copied().unwrap_or(0);
                }
            }
        }
    }

    /// Force a lifecycle check of the entry carrying this operator key.
    pub fn check_snode_by_operator(&self, operator_key: &PublicKey) {
        let outpoint = {
            let state = self.lock();
            state
                .snodes
                .values()
                .find(|entry| entry.operator_pubkey == *operator_key)
                .map(|entry| entry.outpoint.clone())
        };
        let Some(outpoint) = outpoint else {
            return;
        };
        let now = self.clock.now();
        let collateral_unspent = self.chain.utxo(&outpoint).is_some();
        let mut state = self.lock();
        let sentinel = state.last_sentinel_ping_time;
        let size = state.snodes.len();
        let ctx = self.check_context(now, collateral_unspent, sentinel, size, true);
        if let Some(entry) = state.snodes.get_mut(&outpoint) {
            entry.check(&ctx);
        }
    }

    /// Warn once when at least half the network pings a newer daemon.
    pub fn check_daemon_upgrades(&self) -> Option<String> {
        if !self.sync_flags.is_list_synced() {
            return None;
        }
        let mut state = self.lock();
        if state.warned_daemon_updates || state.snodes.is_empty() {
            return None;
        }
        let ours = aurumd_consensus::constants::CLIENT_VERSION;
        let updated = state
            .snodes
            .values()
            .filter(|entry| {
                entry
                    .last_ping
                    .as_ref()
                    .is_some_and(|ping| ping.daemon_version > ours)
            })
            .count();
        if updated < state.snodes.len() / 2 {
            return None;
        }
        state.warned_daemon_updates = true;
        let warning = if updated != state.snodes.len() {
            format!(
                "Warning: at least {} of {} snodes run a newer daemon version, consider updating",
                updated,
                state.snodes.len()
            )
        } else {
            format!(
                "Warning: every snode (out of {} known) runs a newer daemon version, update now",
                state.snodes.len()
            )
        };
        Some(warning)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        *state = RegistryState::default();
    }

    /// Snapshot for the on-disk cache.
    pub fn export_state(&self) -> RegistryExport {
        let state = self.lock();
        RegistryExport {
            snodes: state.snodes.values().cloned().collect(),
            seen_broadcasts: state
                .seen_broadcasts
                .iter()
                .map(|(hash, (at, mnb))| (*hash, *at, mnb.clone()))
                .collect(),
            seen_pings: state
                .seen_pings
                .iter()
                .map(|(hash, mnp)| (*hash, mnp.clone()))
                .collect(),
            recovery_requests: state
                .recovery_requests
                .iter()
                .map(|(hash, (deadline, addrs))| (*hash, *deadline, addrs.iter().copied().collect()))
                .collect(),
            recovery_good_replies: state
                .recovery_good_replies
                .iter()
                .map(|(hash, replies)| (*hash, replies.clone()))
                .collect(),
            last_sentinel_ping_time: state.last_sentinel_ping_time,
            last_queue_seq: state.last_queue_seq,
        }
    }

    pub fn import_state(&self, export: RegistryExport) {
        let mut state = self.lock();
        state.snodes = export
            .snodes
            .into_iter()
            .map(|entry| (entry.outpoint.clone(), entry))
            .collect();
        state.seen_broadcasts = export
            .seen_broadcasts
            .into_iter()
            .map(|(hash, at, mnb)| (hash, (at, mnb)))
            .collect();
        state.seen_pings = export.seen_pings.into_iter().collect();
        state.recovery_requests = export
            .recovery_requests
            .into_iter()
            .map(|(hash, deadline, addrs)| (hash, (deadline, addrs.into_iter().collect())))
            .collect();
        state.recovery_good_replies = export.recovery_good_replies.into_iter().collect();
        state.last_sentinel_ping_time = export.last_sentinel_ping_time;
        state.last_queue_seq = export.last_queue_seq;
    }
}

/// Flattened registry state as persisted in the cache.
pub struct RegistryExport {
    pub snodes: Vec<SnodeEntry>,
    pub seen_broadcasts: Vec<(Hash256, i64, SnodeBroadcast)>,
    pub seen_pings: Vec<(Hash256, SnodePing)>,
    pub recovery_requests: Vec<(Hash256, i64, Vec<SocketAddr>)>,
    pub recovery_good_replies: Vec<(Hash256, Vec<SnodeBroadcast>)>,
    pub last_sentinel_ping_time: i64,
    pub last_queue_seq: u64,
}

fn is_local_address(addr: &SocketAddr) -> bool {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        std::net::IpAddr::V6(ip) => ip.is_loopback(),
    }
}
