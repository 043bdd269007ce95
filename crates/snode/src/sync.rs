//! Staged bootstrap of snode data (C4).
//!
//! Brings a fresh peer from "no data" to "fully synced" across sporks,
//! the registry, the payment-vote database, and governance objects.
//! Progress is tracked per asset with a shared timeout that is pushed
//! back whenever relevant data arrives.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::ChainParams;
use aurumd_consensus::Network;

use crate::chain::ChainView;
use crate::clock::Clock;
use crate::fulfilled::FulfilledRequests;
use crate::governance::GovernanceView;
use crate::net::{NetSink, PeerId, SnodeMessage};
use crate::payments::{min_snode_payment_proto, PaymentVoter};
use crate::registry::Registry;
use crate::spork::SporkSet;

pub const SYNC_ASSET_FAILED: i32 = -1;
pub const SYNC_ASSET_INITIAL: i32 = 0;
pub const SYNC_ASSET_WAITING: i32 = 1;
pub const SYNC_ASSET_LIST: i32 = 2;
pub const SYNC_ASSET_VOTES: i32 = 3;
pub const SYNC_ASSET_GOVERNANCE: i32 = 4;
pub const SYNC_ASSET_FINISHED: i32 = 999;

pub const SYNC_TICK_SECONDS: i64 = 6;
pub const SYNC_TIMEOUT_SECONDS: i64 = 30;
/// A gap this long between ticks means the host slept; restart the sync.
pub const SYNC_IDLE_RESET_SECONDS: i64 = 60 * 60;
/// Cooldown before retrying after a failed sync.
pub const SYNC_FAILURE_COOLDOWN_SECONDS: i64 = 60;
/// Ask at most this many peers per asset.
pub const SYNC_MAX_PEERS_PER_ASSET: i32 = 3;

const SPORK_SYNC_REQUEST: &str = "spork-sync";
const LIST_SYNC_REQUEST: &str = "snode-list-sync";
const PAYMENT_SYNC_REQUEST: &str = "snode-payment-sync";
const GOVERNANCE_SYNC_REQUEST: &str = "governance-sync";
const FULL_SYNC_REQUEST: &str = "full-sync";

/// Cross-component view of the sync progress. Components read these flags
/// instead of holding a reference to the controller.
pub struct SyncFlags {
    asset: AtomicI32,
    last_bumped: AtomicI64,
}

impl SyncFlags {
    pub fn new(now: i64) -> Self {
        Self {
            asset: AtomicI32::new(SYNC_ASSET_INITIAL),
            last_bumped: AtomicI64::new(now),
        }
    }

    pub fn asset(&self) -> i32 {
        self.asset.load(Ordering::Relaxed)
    }

    fn set_asset(&self, asset: i32) {
        self.asset.store(asset, Ordering::Relaxed);
    }

    pub fn is_failed(&self) -> bool {
        self.asset() == SYNC_ASSET_FAILED
    }

    pub fn is_blockchain_synced(&self) -> bool {
        self.asset() > SYNC_ASSET_WAITING
    }

    pub fn is_list_synced(&self) -> bool {
        self.asset() > SYNC_ASSET_LIST
    }

    pub fn is_winners_synced(&self) -> bool {
        self.asset() > SYNC_ASSET_VOTES
    }

    pub fn is_synced(&self) -> bool {
        self.asset() == SYNC_ASSET_FINISHED
    }

    /// Push the per-asset timeout back; called whenever sync-relevant data
    /// makes progress.
    pub fn bump(&self, now: i64) {
        if self.is_synced() || self.is_failed() {
            return;
        }
        self.last_bumped.store(now, Ordering::Relaxed);
    }

    pub fn last_bumped(&self) -> i64 {
        self.last_bumped.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncTickOutcome {
    /// The controller just entered `FINISHED`; the activator should re-run.
    pub finished: bool,
}

struct SyncRun {
    attempt: i32,
    started_at: i64,
    last_failure: i64,
    last_process: i64,
    tick: u64,
    no_objects_since: i64,
    last_votes_count: usize,
    last_inflow_check_tick: u64,
}

pub struct SyncController {
    state: Mutex<SyncRun>,
    flags: Arc<SyncFlags>,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    net: Arc<dyn NetSink>,
    sporks: Arc<SporkSet>,
    params: Arc<ChainParams>,
    fulfilled: Arc<FulfilledRequests>,
    snode_mode: bool,
}

impl SyncController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flags: Arc<SyncFlags>,
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        net: Arc<dyn NetSink>,
        sporks: Arc<SporkSet>,
        params: Arc<ChainParams>,
        fulfilled: Arc<FulfilledRequests>,
        snode_mode: bool,
    ) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(SyncRun {
                attempt: 0,
                started_at: now,
                last_failure: 0,
                last_process: now,
                tick: 0,
                no_objects_since: 0,
                last_votes_count: 0,
                last_inflow_check_tick: 0,
            }),
            flags,
            chain,
            clock,
            net,
            sporks,
            params,
            fulfilled,
            snode_mode,
        }
    }

    pub fn flags(&self) -> &Arc<SyncFlags> {
        &self.flags
    }

    pub fn asset_name(&self) -> &'static str {
        match self.flags.asset() {
            SYNC_ASSET_FAILED => "SNODE_SYNC_FAILED",
            SYNC_ASSET_INITIAL => "SNODE_SYNC_INITIAL",
            SYNC_ASSET_WAITING => "SNODE_SYNC_WAITING",
            SYNC_ASSET_LIST => "SNODE_SYNC_LIST",
            SYNC_ASSET_VOTES => "SNODE_SYNC_VOTES",
            SYNC_ASSET_GOVERNANCE => "SNODE_SYNC_GOVERNANCE",
            SYNC_ASSET_FINISHED => "SNODE_SYNC_FINISHED",
            _ => "UNKNOWN",
        }
    }

    pub fn sync_status(&self) -> &'static str {
        match self.flags.asset() {
            SYNC_ASSET_INITIAL => "Synchronizing blockchain...",
            SYNC_ASSET_WAITING => "Synchronization pending...",
            SYNC_ASSET_LIST => "Synchronizing snodes...",
            SYNC_ASSET_VOTES => "Synchronizing snode payments...",
            SYNC_ASSET_GOVERNANCE => "Synchronizing governance objects...",
            SYNC_ASSET_FAILED => "Synchronization failed",
            SYNC_ASSET_FINISHED => "Synchronization finished",
            _ => "",
        }
    }

    /// Rough progress fraction for UI reporting.
    pub fn progress(&self) -> f64 {
        let asset = self.flags.asset();
        if asset == SYNC_ASSET_FINISHED {
            return 1.0;
        }
        if asset <= SYNC_ASSET_INITIAL {
            return 0.0;
        }
        let attempt = self.state.lock().expect("sync lock").attempt;
        (attempt as f64 + (asset as f64 - 1.0) * 8.0) / (8.0 * 4.0)
    }

    pub fn reset(&self) {
        let now = self.clock.now();
        let mut run = self.state.lock().expect("sync lock");
        run.attempt = 0;
        run.started_at = now;
        run.no_objects_since = 0;
        run.last_votes_count = 0;
        self.flags.set_asset(SYNC_ASSET_INITIAL);
        self.flags.bump(now);
    }

    fn fail(&self) {
        let now = self.clock.now();
        let mut run = self.state.lock().expect("sync lock");
        run.last_failure = now;
        self.flags.set_asset(SYNC_ASSET_FAILED);
    }

    fn switch_to_next_asset(&self) -> bool {
        let now = self.clock.now();
        let asset = self.flags.asset();
        let (next, finished) = match asset {
            SYNC_ASSET_INITIAL => (SYNC_ASSET_WAITING, false),
            SYNC_ASSET_WAITING => (SYNC_ASSET_LIST, false),
            SYNC_ASSET_LIST => (SYNC_ASSET_VOTES, false),
            SYNC_ASSET_VOTES => (SYNC_ASSET_GOVERNANCE, false),
            SYNC_ASSET_GOVERNANCE => (SYNC_ASSET_FINISHED, true),
            _ => return false,
        };
        aurumd_log::log_info!("sync completed {} -> next stage", self.asset_name());
        self.flags.set_asset(next);
        let mut run = self.state.lock().expect("sync lock");
        run.attempt = 0;
        run.started_at = now;
        drop(run);
        self.flags.bump(now);
        if finished {
            aurumd_log::log_info!("snode sync has finished");
            // flag every peer that carried full-sync traffic so the next
            // tick frees those slots
            let now = self.clock.now();
            for peer in self.net.peers() {
                self.fulfilled.add(peer.addr, FULL_SYNC_REQUEST, now);
            }
        }
        finished
    }

    /// RPC surface: force the controller one stage forward.
    pub fn switch_next(&self) -> bool {
        self.switch_to_next_asset()
    }

    pub fn process_sync_status_count(&self, peer: PeerId, asset: i32, count: i32) {
        if self.flags.is_synced() || self.flags.is_failed() {
            return;
        }
        aurumd_log::log_info!(
            "peer {} reports inventory count {} for sync asset {}",
            peer,
            count,
            asset
        );
    }

    /// Postpone the timeout while headers are still arriving.
    pub fn notify_header_tip(&self) {
        if self.flags.is_failed() || self.flags.is_synced() {
            return;
        }
        if !self.flags.is_blockchain_synced() {
            self.flags.bump(self.clock.now());
        }
    }

    /// One tick of the staged sync, fired every `SYNC_TICK_SECONDS`.
    pub fn process_tick(
        &self,
        registry: &Registry,
        voter: &PaymentVoter,
        gov: &dyn GovernanceView,
    ) -> SyncTickOutcome {
        let now = self.clock.now();
        let mut outcome = SyncTickOutcome::default();

        {
            let mut run = self.state.lock().expect("sync lock");
            run.tick += 1;
            // the host was asleep: restart the whole sync
            if now - run.last_process > SYNC_IDLE_RESET_SECONDS {
                aurumd_log::log_warn!("no sync actions for too long, restarting sync");
                run.last_process = now;
                drop(run);
                self.reset();
                return outcome;
            }
            run.last_process = now;
        }

        if self.flags.is_failed() {
            let last_failure = self.state.lock().expect("sync lock").last_failure;
            if now - last_failure > SYNC_FAILURE_COOLDOWN_SECONDS {
                aurumd_log::log_warn!("sync failed earlier, trying again");
                self.reset();
            }
            return outcome;
        }

        if self.flags.is_synced() {
            // gradually pull remaining governance votes
            for peer in self.net.peers() {
                if peer.snode_conn {
                    continue;
                }
                if self.fulfilled.has(peer.addr, FULL_SYNC_REQUEST) {
                    self.net.disconnect(peer.id);
                    continue;
                }
                gov.request_object_votes(peer.id);
            }
            return outcome;
        }

        // INITIAL and WAITING depend only on the chain, not on peers
        if self.flags.asset() == SYNC_ASSET_INITIAL {
            if self.chain.headers_at_tip() && !self.chain.in_initial_block_download() {
                self.switch_to_next_asset();
            }
            return outcome;
        }
        if self.flags.asset() == SYNC_ASSET_WAITING {
            // grace period after headers reached the tip
            if now - self.flags.last_bumped() > SYNC_TIMEOUT_SECONDS {
                self.switch_to_next_asset();
            }
            return outcome;
        }

        if self.params.network == Network::Regtest {
            outcome.finished = self.process_tick_regtest(registry, gov);
            return outcome;
        }

        let timed_out = now - self.flags.last_bumped() > SYNC_TIMEOUT_SECONDS;

        for peer in self.net.peers() {
            // direct snode connections are temporary and unreliable for
            // sync; inbound connections this early are likely the same
            if peer.snode_conn || (self.snode_mode && peer.inbound) {
                continue;
            }

            if self.fulfilled.has(peer.addr, FULL_SYNC_REQUEST) {
                // already fully synced from this one recently, free the slot
                self.net.disconnect(peer.id);
                continue;
            }

            // always ask for sporks first, once per peer
            if !self.fulfilled.has(peer.addr, SPORK_SYNC_REQUEST) {
                self.fulfilled.add(peer.addr, SPORK_SYNC_REQUEST, now);
                self.net.send(peer.id, SnodeMessage::GetSporks);
            }

            match self.flags.asset() {
                SYNC_ASSET_LIST => {
                    if timed_out {
                        let attempt = self.state.lock().expect("sync lock").attempt;
                        if attempt == 0 {
                            aurumd_log::log_error!("failed to sync {}", self.asset_name());
                            // no way to continue without the registry
                            self.fail();
                            return outcome;
                        }
                        outcome.finished = self.switch_to_next_asset();
                        return outcome;
                    }
                    {
                        let run = self.state.lock().expect("sync lock");
                        if run.attempt >= SYNC_MAX_PEERS_PER_ASSET {
                            return outcome;
                        }
                    }
                    if self.fulfilled.has(peer.addr, LIST_SYNC_REQUEST) {
                        continue;
                    }
                    if peer.version < min_snode_payment_proto(&self.sporks) {
                        continue;
                    }
                    self.fulfilled.add(peer.addr, LIST_SYNC_REQUEST, now);
                    self.state.lock().expect("sync lock").attempt += 1;
                    registry.dseg_update(peer.id, peer.addr);
                    // one productive request per tick keeps peers balanced
                    return outcome;
                }
                SYNC_ASSET_VOTES => {
                    if timed_out {
                        let attempt = self.state.lock().expect("sync lock").attempt;
                        if attempt == 0 {
                            aurumd_log::log_error!("failed to sync {}", self.asset_name());
                            self.fail();
                            return outcome;
                        }
                        outcome.finished = self.switch_to_next_asset();
                        return outcome;
                    }
                    {
                        let run = self.state.lock().expect("sync lock");
                        if run.attempt > 1 && voter.is_enough_data(registry.size()) {
                            aurumd_log::log_info!("found enough payment data");
                            drop(run);
                            outcome.finished = self.switch_to_next_asset();
                            return outcome;
                        }
                        if run.attempt >= SYNC_MAX_PEERS_PER_ASSET {
                            return outcome;
                        }
                    }
                    if self.fulfilled.has(peer.addr, PAYMENT_SYNC_REQUEST) {
                        continue;
                    }
                    if peer.version < min_snode_payment_proto(&self.sporks) {
                        continue;
                    }
                    self.fulfilled.add(peer.addr, PAYMENT_SYNC_REQUEST, now);
                    self.state.lock().expect("sync lock").attempt += 1;
                    // full vote history, then the missing pieces
                    self.net.send(peer.id, SnodeMessage::PaymentSync);
                    voter.request_low_data_payment_blocks(peer.id, registry.size());
                    return outcome;
                }
                SYNC_ASSET_GOVERNANCE => {
                    if timed_out {
                        let attempt = self.state.lock().expect("sync lock").attempt;
                        if attempt == 0 {
                            aurumd_log::log_warn!(
                                "failed to sync {}, moving on",
                                self.asset_name()
                            );
                        }
                        outcome.finished = self.switch_to_next_asset();
                        return outcome;
                    }
                    if self.fulfilled.has(peer.addr, GOVERNANCE_SYNC_REQUEST) {
                        if self.governance_inflow_settled(gov, peer.id, now) {
                            outcome.finished = self.switch_to_next_asset();
                            return outcome;
                        }
                        continue;
                    }
                    if peer.version < aurumd_consensus::constants::MIN_GOVERNANCE_PROTO_VERSION {
                        continue;
                    }
                    self.fulfilled.add(peer.addr, GOVERNANCE_SYNC_REQUEST, now);
                    self.state.lock().expect("sync lock").attempt += 1;
                    self.net
                        .send(peer.id, SnodeMessage::GovernanceSync(Vec::new()));
                    return outcome;
                }
                _ => {}
            }
        }

        outcome
    }

    /// Straight-through sync for regtest: a handful of attempt-counted
    /// requests against whichever peers exist.
    fn process_tick_regtest(&self, registry: &Registry, _gov: &dyn GovernanceView) -> bool {
        let Some(peer) = self.net.peers().into_iter().next() else {
            return false;
        };
        let attempt = {
            let mut run = self.state.lock().expect("sync lock");
            let attempt = run.attempt;
            run.attempt += 1;
            attempt
        };
        if attempt <= 2 {
            self.net.send(peer.id, SnodeMessage::GetSporks);
        } else if attempt < 4 {
            registry.dseg_update(peer.id, peer.addr);
        } else if attempt < 6 {
            self.net.send(peer.id, SnodeMessage::PaymentSync);
            self.net
                .send(peer.id, SnodeMessage::GovernanceSync(Vec::new()));
        } else {
            self.flags.set_asset(SYNC_ASSET_FINISHED);
            aurumd_log::log_info!("snode sync has finished (regtest)");
            return true;
        }
        false
    }

    /// Governance completion: every object asked, the quiet period has
    /// held, and vote inflow has dried up.
    fn governance_inflow_settled(
        &self,
        gov: &dyn GovernanceView,
        peer: PeerId,
        now: i64,
    ) -> bool {
        let objects_left = gov.request_object_votes(peer);
        let mut run = self.state.lock().expect("sync lock");
        if objects_left != 0 {
            run.no_objects_since = 0;
            return false;
        }
        if run.no_objects_since == 0 {
            run.no_objects_since = now;
            return false;
        }
        // check the inflow once per tick at most
        if run.last_inflow_check_tick == run.tick {
            return false;
        }
        let votes = gov.vote_count();
        let inflow = votes.saturating_sub(run.last_votes_count);
        let settled = now - run.no_objects_since > SYNC_TIMEOUT_SECONDS
            && inflow
                < (run.last_votes_count / 10_000).max(SYNC_TICK_SECONDS as usize);
        run.last_inflow_check_tick = run.tick;
        run.last_votes_count = votes;
        if settled {
            run.no_objects_since = 0;
        }
        settled
    }
}
