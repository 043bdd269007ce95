//! Proof-of-service verification engine (C2).
//!
//! Top-ranked snodes probe addresses directly and collect a signed proof
//! that the entry announced there controls its operator key. A verified
//! reply is counter-signed and broadcast; every other entry squatting the
//! same address has its PoSe ban score raised.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::constants::MIN_POSE_PROTO_VERSION;
use aurumd_consensus::Hash256;

use crate::chain::ChainView;
use crate::clock::Clock;
use crate::fulfilled::FulfilledRequests;
use crate::messages::SnodeVerification;
use crate::net::{Inv, NetSink, PeerId, SnodeMessage, MSG_SNODE_VERIFY};
use crate::registry::Registry;
use crate::signing;
use crate::spork::SporkSet;
use crate::sync::SyncFlags;
use crate::{LocalSnode, Rejection};

const VERIFY_REQUEST: &str = "snverify-request";
const VERIFY_REPLY: &str = "snverify-reply";
const VERIFY_DONE: &str = "snverify-done";

pub struct Verifier {
    pending: Mutex<PendingState>,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    net: Arc<dyn NetSink>,
    sporks: Arc<SporkSet>,
    sync_flags: Arc<SyncFlags>,
    local: Arc<LocalSnode>,
    cached_height: Arc<AtomicI64>,
    rng: Arc<crate::SharedRng>,
    fulfilled: Arc<FulfilledRequests>,
}

#[derive(Default)]
struct PendingState {
    /// Probes waiting for their direct connection to come up.
    pending_requests: HashMap<SocketAddr, (i64, SnodeVerification)>,
    /// Probes we sent, kept to match replies by nonce and height.
    we_asked: HashMap<SocketAddr, SnodeVerification>,
    seen: HashMap<Hash256, SnodeVerification>,
}

impl Verifier {
    pub const MAX_POSE_CONNECTIONS: usize = 10;
    pub const MAX_POSE_RANK: i64 = 10;
    pub const MAX_POSE_BLOCKS: i64 = 10;

    /// Direct connections give the remote this long to respond.
    pub const PENDING_REQUEST_TIMEOUT_SECONDS: i64 = 15;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        net: Arc<dyn NetSink>,
        sporks: Arc<SporkSet>,
        sync_flags: Arc<SyncFlags>,
        local: Arc<LocalSnode>,
        cached_height: Arc<AtomicI64>,
        rng: Arc<crate::SharedRng>,
        fulfilled: Arc<FulfilledRequests>,
    ) -> Self {
        Self {
            pending: Mutex::new(PendingState::default()),
            chain,
            clock,
            net,
            sporks,
            sync_flags,
            local,
            cached_height,
            rng,
            fulfilled,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.pending.lock().expect("verification lock")
    }

    /// One verification round: probe addresses by rank offset and stride.
    pub fn do_verification_step(&self, registry: &Registry) {
        if self.local.active_outpoint().is_none() || !self.sync_flags.is_synced() {
            return;
        }
        let our_outpoint = self.local.active_outpoint().expect("checked above");
        let height = self.cached_height.load(Ordering::Relaxed) - 1;
        let ranked = registry.get_ranks_with_proto(height, MIN_POSE_PROTO_VERSION);
        if ranked.is_empty() {
            return;
        }

        let mut my_rank = None;
        for (rank, info) in &ranked {
            if *rank > Self::MAX_POSE_RANK {
                aurumd_log::log_debug!(
                    "must be in top {} to send verify requests",
                    Self::MAX_POSE_RANK
                );
                return;
            }
            if info.outpoint == our_outpoint {
                my_rank = Some(*rank);
                break;
            }
        }
        let Some(my_rank) = my_rank else {
            return;
        };

        let now = self.clock.now();
        let mut offset = (Self::MAX_POSE_RANK + my_rank - 1) as usize;
        if offset >= ranked.len() {
            return;
        }

        let mut sent = 0;
        while offset < ranked.len() {
            let (_, info) = &ranked[offset];
            if info.pose_verified || info.active_state == crate::entry::ActiveState::PoseBan {
                offset += Self::MAX_POSE_CONNECTIONS;
                continue;
            }
            if !self.fulfilled.has(info.addr, VERIFY_REQUEST) {
                aurumd_log::log_debug!(
                    "verifying snode {} at {}",
                    info.outpoint.to_string_short(),
                    info.addr
                );
                let nonce = self.rng.below_u32(999_999);
                let mnv = SnodeVerification::new(info.addr, nonce, height);
                self.net.connect(info.addr);
                self.lock()
                    .pending_requests
                    .insert(info.addr, (now + Self::PENDING_REQUEST_TIMEOUT_SECONDS, mnv));
                sent += 1;
                if sent >= Self::MAX_POSE_CONNECTIONS {
                    break;
                }
            }
            offset += Self::MAX_POSE_CONNECTIONS;
        }
        if sent > 0 {
            aurumd_log::log_debug!("sent verification requests to {} snodes", sent);
        }
    }

    /// Flush probes whose direct connection came up; expire the rest.
    pub fn process_pending_requests(&self) {
        let now = self.clock.now();
        let pending: Vec<(SocketAddr, SnodeVerification)> = {
            let state = self.lock();
            state
                .pending_requests
                .iter()
                .map(|(addr, (_, mnv))| (*addr, mnv.clone()))
                .collect()
        };

        let mut sent = Vec::new();
        for (addr, mnv) in pending {
            if let Some(peer) = self.net.is_connected(addr) {
                self.fulfilled.add(addr, VERIFY_REQUEST, now);
                self.net.send(peer, SnodeMessage::Verify(mnv.clone()));
                sent.push((addr, mnv));
            }
        }

        let mut state = self.lock();
        for (addr, mnv) in sent {
            state.we_asked.insert(addr, mnv);
            state.pending_requests.remove(&addr);
        }
        state
            .pending_requests
            .retain(|_, (deadline, _)| *deadline > now);
    }

    /// CASE 1: a verifier asks us to prove we own our address.
    pub fn send_reply(&self, peer: PeerId, peer_addr: SocketAddr, mut mnv: SnodeVerification) {
        // only snodes sign replies; a malicious peer may be probing a
        // stolen address, so never penalize a plain request
        if !self.local.snode_mode {
            return;
        }
        let Some(keys) = self.local.keys() else {
            return;
        };
        if self.fulfilled.has(peer_addr, VERIFY_REPLY) {
            aurumd_log::log_warn!("peer {} asked for verification too often", peer_addr);
            self.net.misbehave(peer, 20);
            return;
        }
        let Some(block_hash) = self.chain.block_hash(mnv.block_height) else {
            aurumd_log::log_warn!(
                "can't reply to verification for unknown height {}",
                mnv.block_height
            );
            return;
        };

        mnv.sig1 = if self.sporks.new_sigs() {
            signing::sign_hash(&keys.secret, &mnv.signature_hash1(&block_hash))
        } else {
            signing::sign_message(&keys.secret, &mnv.legacy_message1(&block_hash))
        };
        self.net.send(peer, SnodeMessage::Verify(mnv));
        self.fulfilled.add(peer_addr, VERIFY_REPLY, self.clock.now());
    }

    /// CASE 2: the reply to a probe we sent.
    pub fn process_reply(
        &self,
        peer: PeerId,
        peer_addr: SocketAddr,
        mut mnv: SnodeVerification,
        registry: &Registry,
    ) -> Result<(), Rejection> {
        let now = self.clock.now();

        if !self.fulfilled.has(peer_addr, VERIFY_REQUEST) {
            return Err(Rejection::ban("unsolicited verification reply", 20));
        }
        {
            let state = self.lock();
            let Some(asked) = state.we_asked.get(&peer_addr) else {
                return Err(Rejection::ban("unsolicited verification reply", 20));
            };
            if asked.nonce != mnv.nonce {
                return Err(Rejection::ban("verification reply nonce mismatch", 20));
            }
            if asked.block_height != mnv.block_height {
                return Err(Rejection::ban("verification reply height mismatch", 20));
            }
        }
        let Some(block_hash) = self.chain.block_hash(mnv.block_height) else {
            return Ok(());
        };
        if self.fulfilled.has(peer_addr, VERIFY_DONE) {
            return Err(Rejection::ban("address verified recently already", 20));
        }

        let mut real: Option<aurumd_primitives::OutPoint> = None;
        let mut impostors = Vec::new();
        for (outpoint, operator_key) in registry.operator_keys_at_address(peer_addr) {
            let verified = verify_sig1(&mnv, &operator_key, &block_hash);
            if verified && real.is_none() {
                real = Some(outpoint.clone());
                registry.decrease_pose_ban_score(&outpoint);
                self.fulfilled.add(peer_addr, VERIFY_DONE, now);

                // counter-sign and broadcast if we are an active snode
                if let (Some(our_outpoint), Some(keys)) =
                    (self.local.active_outpoint(), self.local.keys())
                {
                    mnv.responder_outpoint = outpoint;
                    mnv.verifier_outpoint = our_outpoint;
                    mnv.sig2 = if self.sporks.new_sigs() {
                        signing::sign_hash(&keys.secret, &mnv.signature_hash2(&block_hash))
                    } else {
                        signing::sign_message(&keys.secret, &mnv.legacy_message2(&block_hash))
                    };
                    let hash = mnv.hash();
                    let mut state = self.lock();
                    state.we_asked.insert(peer_addr, mnv.clone());
                    state.seen.insert(hash, mnv.clone());
                    drop(state);
                    self.net.relay_inv(Inv {
                        kind: MSG_SNODE_VERIFY,
                        hash,
                    });
                }
            } else if !verified {
                impostors.push(outpoint);
            }
        }

        let Some(real) = real else {
            // nobody at that address could sign: the peer is playing games
            aurumd_log::log_warn!("no real snode found for addr {}", peer_addr);
            self.net.misbehave(peer, 20);
            return Ok(());
        };
        aurumd_log::log_info!(
            "verified real snode {} for addr {}",
            real.to_string_short(),
            peer_addr
        );
        let impostor_count = impostors.len();
        for outpoint in impostors {
            registry.increase_pose_ban_score(&outpoint);
        }
        if impostor_count > 0 {
            aurumd_log::log_info!(
                "PoSe score increased for {} fake snodes at addr {}",
                impostor_count,
                peer_addr
            );
        }
        Ok(())
    }

    /// CASE 3: a double-signed testimony broadcast by some verifier.
    pub fn process_testimony(
        &self,
        _peer: PeerId,
        mnv: SnodeVerification,
        registry: &Registry,
    ) -> Result<(), Rejection> {
        let tip = self.cached_height.load(Ordering::Relaxed);
        {
            let mut state = self.lock();
            if state.seen.contains_key(&mnv.hash()) {
                return Ok(());
            }
            state.seen.insert(mnv.hash(), mnv.clone());
        }

        // we don't care about history
        if mnv.block_height < tip - Self::MAX_POSE_BLOCKS {
            return Ok(());
        }

        if mnv.responder_outpoint == mnv.verifier_outpoint {
            // verifying yourself is never an accident
            return Err(Rejection::ban("snode verified itself", 100));
        }

        let Some(block_hash) = self.chain.block_hash(mnv.block_height) else {
            return Ok(());
        };

        let rank = registry.get_rank_with_proto(
            &mnv.verifier_outpoint,
            mnv.block_height,
            MIN_POSE_PROTO_VERSION,
        );
        if rank == -1 {
            return Ok(());
        }
        if rank > Self::MAX_POSE_RANK {
            return Err(Rejection::new("verifier outside the PoSe quorum"));
        }

        let Some(responder) = registry.get_info(&mnv.responder_outpoint) else {
            return Err(Rejection::new("testimony names an unknown responder"));
        };
        let Some(verifier) = registry.get_info(&mnv.verifier_outpoint) else {
            return Err(Rejection::new("testimony names an unknown verifier"));
        };

        if responder.addr != mnv.addr {
            return Err(Rejection::new("testimony address does not match the responder"));
        }

        if !verify_sig1(&mnv, &responder.operator_pubkey, &block_hash) {
            return Err(Rejection::new("testimony responder signature invalid"));
        }
        if !verify_sig2(&mnv, &verifier.operator_pubkey, &block_hash) {
            return Err(Rejection::new("testimony verifier signature invalid"));
        }

        registry.decrease_pose_ban_score(&mnv.responder_outpoint);
        self.net.relay_inv(Inv {
            kind: MSG_SNODE_VERIFY,
            hash: mnv.hash(),
        });
        aurumd_log::log_info!(
            "verified snode {} for addr {}",
            mnv.responder_outpoint.to_string_short(),
            mnv.addr
        );

        let mut raised = 0;
        for (outpoint, _) in registry.operator_keys_at_address(mnv.addr) {
            if outpoint == mnv.responder_outpoint {
                continue;
            }
            registry.increase_pose_ban_score(&outpoint);
            raised += 1;
        }
        if raised > 0 {
            aurumd_log::log_info!(
                "PoSe score increased for {} fake snodes at addr {}",
                raised,
                mnv.addr
            );
        }
        Ok(())
    }

    /// Ban unverified duplicates of an address with a verified occupant.
    pub fn check_same_addr(&self, registry: &Registry) {
        if !self.sync_flags.is_synced() {
            return;
        }
        let mut candidates = registry.same_addr_candidates();
        if candidates.is_empty() {
            return;
        }
        candidates.retain(|(_, _, state, _)| {
            matches!(
                state,
                crate::entry::ActiveState::Enabled | crate::entry::ActiveState::PreEnabled
            )
        });
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        // find a verified entry per address and ban the other occupants;
        // with no verified entry yet nobody gets banned
        let mut to_ban = Vec::new();
        let mut prev: Option<(aurumd_primitives::OutPoint, SocketAddr)> = None;
        let mut verified_here: Option<aurumd_primitives::OutPoint> = None;
        for (outpoint, addr, _, verified) in candidates {
            match &prev {
                None => {
                    verified_here = verified.then(|| outpoint.clone());
                }
                Some((prev_outpoint, prev_addr)) => {
                    if addr == *prev_addr {
                        if verified_here.is_some() {
                            to_ban.push(outpoint.clone());
                        } else if verified {
                            to_ban.push(prev_outpoint.clone());
                            verified_here = Some(outpoint.clone());
                        }
                    } else {
                        verified_here = verified.then(|| outpoint.clone());
                    }
                }
            }
            prev = Some((outpoint, addr));
        }

        for outpoint in to_ban {
            aurumd_log::log_info!(
                "increasing PoSe ban score for duplicate snode {}",
                outpoint.to_string_short()
            );
            registry.increase_pose_ban_score(&outpoint);
        }
    }

    /// Serve a GETDATA for a testimony we relayed.
    pub fn get_data(&self, inv: &Inv) -> Option<SnodeMessage> {
        if inv.kind != MSG_SNODE_VERIFY {
            return None;
        }
        self.lock()
            .seen
            .get(&inv.hash)
            .map(|mnv| SnodeMessage::Verify(mnv.clone()))
    }

    /// Reap testimonies and request bookkeeping past the PoSe window.
    pub fn check_and_remove(&self) {
        let tip = self.cached_height.load(Ordering::Relaxed);
        let mut state = self.lock();
        state
            .seen
            .retain(|_, mnv| mnv.block_height >= tip - Self::MAX_POSE_BLOCKS);
        state
            .we_asked
            .retain(|_, mnv| mnv.block_height >= tip - Self::MAX_POSE_BLOCKS);
    }
}

fn verify_sig1(
    mnv: &SnodeVerification,
    operator_key: &secp256k1::PublicKey,
    block_hash: &Hash256,
) -> bool {
    signing::verify_hash(operator_key, &mnv.signature_hash1(block_hash), &mnv.sig1).is_ok()
        || signing::verify_message(operator_key, &mnv.legacy_message1(block_hash), &mnv.sig1)
            .is_ok()
}

fn verify_sig2(
    mnv: &SnodeVerification,
    operator_key: &secp256k1::PublicKey,
    block_hash: &Hash256,
) -> bool {
    signing::verify_hash(operator_key, &mnv.signature_hash2(block_hash), &mnv.sig2).is_ok()
        || signing::verify_message(operator_key, &mnv.legacy_message2(block_hash), &mnv.sig2)
            .is_ok()
}
