//! Service-node coordination layer.
//!
//! Maintains the replicated registry of collateral-backed service nodes,
//! elects the snode paid in each block through a voting quorum, enforces
//! that payment in block validation, attests peer liveness via
//! proof-of-service, and bootstraps all of it through a staged sync.
//!
//! The base chain, transport, wallet, and governance live in the
//! surrounding process and are reached through the `ChainView`,
//! `NetSink`, and `GovernanceView` traits.

pub mod active;
pub mod chain;
pub mod clock;
pub mod config;
pub mod entry;
pub mod fulfilled;
pub mod governance;
pub mod messages;
pub mod net;
pub mod payments;
pub mod registry;
pub mod scheduler;
pub mod signing;
pub mod spork;
pub mod store;
pub mod sync;
pub mod verification;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::ChainParams;
use aurumd_primitives::OutPoint;
use aurumd_storage::KeyValueStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secp256k1::PublicKey;

use crate::active::Activator;
use crate::chain::ChainView;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::fulfilled::FulfilledRequests;
use crate::governance::GovernanceView;
use crate::net::{NetSink, PeerId, SnodeMessage, MSG_SNODE_PAYMENT_BLOCK, MSG_SNODE_PAYMENT_VOTE};
use crate::payments::{storage_limit, PaymentVoter};
use crate::registry::Registry;
use crate::signing::KeyPair;
use crate::spork::SporkSet;
use crate::sync::{SyncController, SyncFlags};
use crate::verification::Verifier;

/// Why an ingested object was refused, plus the misbehavior score the
/// sender earned for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub ban: i32,
    pub reason: &'static str,
}

impl Rejection {
    pub fn new(reason: &'static str) -> Self {
        Self { ban: 0, reason }
    }

    pub fn ban(reason: &'static str, ban: i32) -> Self {
        Self { ban, reason }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Payment-schedule queries the registry needs from the voter, inverted
/// into a trait so neither component holds the other.
pub trait ScheduleView {
    fn is_scheduled(&self, payee_script: &[u8], not_height: i64) -> bool;
}

/// This process's snode identity, shared read-mostly across components.
pub struct LocalSnode {
    pub snode_mode: bool,
    keys: Option<KeyPair>,
    active_outpoint: Mutex<Option<OutPoint>>,
}

impl LocalSnode {
    pub fn new(snode_mode: bool, keys: Option<KeyPair>) -> Self {
        Self {
            snode_mode,
            keys,
            active_outpoint: Mutex::new(None),
        }
    }

    pub fn keys(&self) -> Option<KeyPair> {
        self.keys.clone()
    }

    pub fn operator_pubkey(&self) -> Option<PublicKey> {
        if !self.snode_mode {
            return None;
        }
        self.keys.as_ref().map(|keys| keys.public)
    }

    pub(crate) fn operator_pubkey_ref(&self) -> Option<&PublicKey> {
        if !self.snode_mode {
            return None;
        }
        self.keys.as_ref().map(|keys| &keys.public)
    }

    pub fn active_outpoint(&self) -> Option<OutPoint> {
        self.active_outpoint.lock().expect("local snode lock").clone()
    }

    pub fn set_active_outpoint(&self, outpoint: Option<OutPoint>) {
        *self.active_outpoint.lock().expect("local snode lock") = outpoint;
    }
}

/// Non-cryptographic RNG seeded once at startup; used for PoSe nonces and
/// recovery peer selection. Ranking never touches it.
pub struct SharedRng(Mutex<StdRng>);

impl SharedRng {
    pub fn from_entropy() -> Self {
        Self(Mutex::new(StdRng::from_entropy()))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub fn below_u32(&self, bound: u32) -> u32 {
        self.0.lock().expect("rng lock").gen_range(0..bound.max(1))
    }

    pub fn below_i64(&self, bound: i64) -> i64 {
        self.0.lock().expect("rng lock").gen_range(0..bound.max(1))
    }
}

/// The five components wired together, plus their shared services.
pub struct Core {
    pub params: Arc<ChainParams>,
    chain: Arc<dyn ChainView>,
    net: Arc<dyn NetSink>,
    gov: Arc<dyn GovernanceView>,
    store: Arc<dyn KeyValueStore>,
    pub sporks: Arc<SporkSet>,
    pub local: Arc<LocalSnode>,
    flags: Arc<SyncFlags>,
    fulfilled: Arc<FulfilledRequests>,
    cached_height: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
    pub registry: Registry,
    pub voter: PaymentVoter,
    pub verifier: Verifier,
    pub sync: SyncController,
    pub activator: Activator,
    lite_mode: bool,
    shutdown: AtomicBool,
}

impl Core {
    pub fn new(
        config: CoreConfig,
        chain: Arc<dyn ChainView>,
        net: Arc<dyn NetSink>,
        clock: Arc<dyn Clock>,
        gov: Arc<dyn GovernanceView>,
        store: Arc<dyn KeyValueStore>,
        rng: Arc<SharedRng>,
    ) -> Result<Arc<Self>, String> {
        let params = Arc::new(config.params());
        let keys = config.operator_keys(&params)?;
        let local = Arc::new(LocalSnode::new(config.snode_mode, keys));
        let sporks = Arc::new(SporkSet::new());
        let flags = Arc::new(SyncFlags::new(clock.now()));
        let fulfilled = Arc::new(FulfilledRequests::new());
        let cached_height = Arc::new(AtomicI64::new(chain.tip_height()));

        let registry = Registry::new(
            Arc::clone(&chain),
            Arc::clone(&clock),
            Arc::clone(&net),
            Arc::clone(&sporks),
            Arc::clone(&params),
            Arc::clone(&flags),
            Arc::clone(&local),
            Arc::clone(&cached_height),
            Arc::clone(&rng),
        );
        let voter = PaymentVoter::new(
            Arc::clone(&chain),
            Arc::clone(&clock),
            Arc::clone(&net),
            Arc::clone(&sporks),
            Arc::clone(&params),
            Arc::clone(&flags),
            Arc::clone(&local),
            Arc::clone(&cached_height),
        );
        let verifier = Verifier::new(
            Arc::clone(&chain),
            Arc::clone(&clock),
            Arc::clone(&net),
            Arc::clone(&sporks),
            Arc::clone(&flags),
            Arc::clone(&local),
            Arc::clone(&cached_height),
            Arc::clone(&rng),
            Arc::clone(&fulfilled),
        );
        let sync = SyncController::new(
            Arc::clone(&flags),
            Arc::clone(&chain),
            Arc::clone(&clock),
            Arc::clone(&net),
            Arc::clone(&sporks),
            Arc::clone(&params),
            Arc::clone(&fulfilled),
            config.snode_mode,
        );
        let activator = Activator::new(
            Arc::clone(&chain),
            Arc::clone(&clock),
            Arc::clone(&net),
            Arc::clone(&sporks),
            Arc::clone(&params),
            Arc::clone(&flags),
            Arc::clone(&local),
            config.external_ip,
            config.listen,
        );

        Ok(Arc::new(Self {
            params,
            chain,
            net,
            gov,
            store,
            sporks,
            local,
            flags,
            fulfilled,
            cached_height,
            clock,
            registry,
            voter,
            verifier,
            sync,
            activator,
            lite_mode: config.lite_mode,
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn flags(&self) -> &Arc<SyncFlags> {
        &self.flags
    }

    pub fn cached_height(&self) -> i64 {
        self.cached_height.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Load the persisted cache; wipes it on a version mismatch.
    pub fn load_cache(&self) -> Result<bool, String> {
        store::load_registry(self.store.as_ref(), &self.registry).map_err(|err| err.to_string())
    }

    pub fn flush_cache(&self) -> Result<(), String> {
        store::save_registry(self.store.as_ref(), &self.registry).map_err(|err| err.to_string())
    }

    fn reject(&self, peer: PeerId, rejection: Rejection) {
        if rejection.ban > 0 {
            self.net.misbehave(peer, rejection.ban);
        }
        aurumd_log::log_debug!("rejected: {}", rejection.reason);
    }

    /// Dispatch one transport message into the owning component.
    pub fn process_message(&self, peer: PeerId, peer_addr: SocketAddr, message: SnodeMessage) {
        if self.lite_mode {
            return;
        }
        match message {
            SnodeMessage::Announce(mnb) => {
                if !self.flags.is_blockchain_synced() {
                    return;
                }
                match self.registry.process_broadcast(Some((peer, peer_addr)), mnb) {
                    Ok(outcome) => {
                        if outcome.ours {
                            self.activator.manage_state(&self.registry);
                        }
                    }
                    Err(rejection) => self.reject(peer, rejection),
                }
            }
            SnodeMessage::Ping(mnp) => {
                if !self.flags.is_blockchain_synced() {
                    return;
                }
                if let Err(rejection) = self.registry.process_ping(Some(peer), mnp) {
                    self.reject(peer, rejection);
                }
            }
            SnodeMessage::Dseg(outpoint) => {
                self.registry.process_dseg(peer, peer_addr, outpoint);
            }
            SnodeMessage::PaymentSync => {
                self.voter
                    .process_payment_sync(peer, peer_addr, &self.fulfilled);
            }
            SnodeMessage::PaymentVote(vote) => {
                if let Err(rejection) =
                    self.voter
                        .process_vote(Some((peer, peer_addr)), vote, &self.registry)
                {
                    self.reject(peer, rejection);
                }
            }
            SnodeMessage::Verify(mnv) => {
                if !self.flags.is_list_synced() {
                    return;
                }
                let result = if mnv.is_request() {
                    self.verifier.send_reply(peer, peer_addr, mnv);
                    Ok(())
                } else if mnv.is_reply() {
                    self.verifier
                        .process_reply(peer, peer_addr, mnv, &self.registry)
                } else {
                    self.verifier.process_testimony(peer, mnv, &self.registry)
                };
                if let Err(rejection) = result {
                    self.reject(peer, rejection);
                }
            }
            SnodeMessage::GovernanceSync(payload) => {
                self.gov.process_sync_payload(peer, &payload);
            }
            SnodeMessage::SyncStatusCount { asset, count } => {
                self.sync.process_sync_status_count(peer, asset, count);
            }
            SnodeMessage::GetSporks => {
                // served by the spork layer of the surrounding process
            }
            SnodeMessage::Inv(_) => {
                // inventory bookkeeping and ask-for scheduling are the
                // transport's concern
            }
            SnodeMessage::GetData(invs) => {
                for inv in invs {
                    if inv.kind == MSG_SNODE_PAYMENT_BLOCK {
                        // a payment block expands into its full vote set
                        if let Some(height) = self.chain.block_height(&inv.hash) {
                            for vote in self.voter.votes_for_height(height) {
                                self.net.send(peer, SnodeMessage::PaymentVote(vote));
                            }
                        }
                        continue;
                    }
                    if let Some(reply) = self.serve_get_data(&inv) {
                        self.net.send(peer, reply);
                    }
                }
            }
        }
    }

    fn serve_get_data(&self, inv: &net::Inv) -> Option<SnodeMessage> {
        match inv.kind {
            MSG_SNODE_PAYMENT_VOTE => self
                .voter
                .get_vote(&inv.hash)
                .map(SnodeMessage::PaymentVote),
            _ => self
                .registry
                .get_data(inv)
                .or_else(|| self.verifier.get_data(inv)),
        }
    }

    /// New chain tip: age the registry, re-elect winners, refresh PoSe.
    pub fn updated_block_tip(&self, height: i64) {
        self.cached_height.store(height, Ordering::Relaxed);
        if self.lite_mode {
            return;
        }
        aurumd_log::log_debug!("updated block tip, height={}", height);

        if !self.flags.is_blockchain_synced() {
            self.flags.bump(self.clock.now());
        }

        self.verifier.check_same_addr(&self.registry);

        if self.local.snode_mode {
            let limit = storage_limit(self.registry.size());
            self.registry
                .update_last_paid(&|h| self.voter.payees_with_votes(h, 2), limit);
        }

        let target = height + payments::VOTE_TARGET_OFFSET;
        self.voter.note_missing_votes(target - 1, &self.registry);
        self.voter.process_block(target, &self.registry);
    }

    /// Headers are still arriving; postpone sync timeouts.
    pub fn notify_header_tip(&self) {
        if self.lite_mode {
            return;
        }
        self.sync.notify_header_tip();
    }

    /// 6-second sync tick; also engages the local activator.
    pub fn sync_tick(&self) {
        if self.lite_mode || self.shutdown_requested() {
            return;
        }
        let outcome = self
            .sync
            .process_tick(&self.registry, &self.voter, self.gov.as_ref());
        if outcome.finished || self.local.snode_mode {
            self.activator.manage_state(&self.registry);
        }
    }

    /// Per-second drains of the direct-connection queues.
    pub fn drain_pending_requests(&self) {
        if self.lite_mode || self.shutdown_requested() {
            return;
        }
        self.registry.process_pending_broadcast_requests();
        self.verifier.process_pending_requests();
    }

    /// Minute-cadence maintenance: sweeps, PoSe round, expiry.
    pub fn periodic_maintenance(&self) {
        if self.lite_mode || self.shutdown_requested() {
            return;
        }
        self.registry.check_and_remove();
        self.voter.check_and_remove(self.registry.size());
        self.verifier.check_and_remove();
        self.verifier.do_verification_step(&self.registry);
        self.fulfilled.check_and_remove(self.clock.now());
        if let Some(warning) = self.registry.check_daemon_upgrades() {
            aurumd_log::log_warn!("{}", warning);
        }
    }
}
