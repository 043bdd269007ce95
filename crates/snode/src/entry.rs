//! Registry entries and their lifecycle state machine.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use aurumd_consensus::{Hash256, Network};
use aurumd_primitives::{sha256d, Decodable, DecodeError, Decoder, Encodable, Encoder, OutPoint};
use primitive_types::U256;
use secp256k1::PublicKey;

use crate::messages::{SnodeBroadcast, SnodePing};
use crate::signing::script_for_key;

pub const SNODE_CHECK_SECONDS: i64 = 5;
pub const SNODE_MIN_BROADCAST_SECONDS: i64 = 5 * 60;
pub const SNODE_MIN_PING_SECONDS: i64 = 10 * 60;
pub const SNODE_EXPIRATION_SECONDS: i64 = 65 * 60;
pub const SNODE_SENTINEL_PING_MAX_SECONDS: i64 = 120 * 60;
pub const SNODE_NEW_START_REQUIRED_SECONDS: i64 = 180 * 60;

pub const SNODE_POSE_BAN_MAX_SCORE: i32 = 5;

/// Seconds of payment-queue grace granted per registered snode to freshly
/// announced entries. Policy constant, not derived.
pub const SNODE_NEW_ENTRY_GRACE_PER_NODE_SECONDS: i64 = 156;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActiveState {
    PreEnabled,
    Enabled,
    Expired,
    OutpointSpent,
    UpdateRequired,
    SentinelPingExpired,
    NewStartRequired,
    PoseBan,
}

impl ActiveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreEnabled => "PRE_ENABLED",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
            Self::OutpointSpent => "OUTPOINT_SPENT",
            Self::UpdateRequired => "UPDATE_REQUIRED",
            Self::SentinelPingExpired => "SENTINEL_PING_EXPIRED",
            Self::NewStartRequired => "NEW_START_REQUIRED",
            Self::PoseBan => "POSE_BAN",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::PreEnabled => 0,
            Self::Enabled => 1,
            Self::Expired => 2,
            Self::OutpointSpent => 3,
            Self::UpdateRequired => 4,
            Self::SentinelPingExpired => 5,
            Self::NewStartRequired => 6,
            Self::PoseBan => 7,
        }
    }

    fn from_u8(raw: u8) -> Result<Self, DecodeError> {
        Ok(match raw {
            0 => Self::PreEnabled,
            1 => Self::Enabled,
            2 => Self::Expired,
            3 => Self::OutpointSpent,
            4 => Self::UpdateRequired,
            5 => Self::SentinelPingExpired,
            6 => Self::NewStartRequired,
            7 => Self::PoseBan,
            _ => return Err(DecodeError::InvalidData("unknown snode state")),
        })
    }

    /// States from which a node recovers on its own once pings resume.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Enabled | Self::PreEnabled | Self::Expired | Self::SentinelPingExpired
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollateralStatus {
    Ok,
    UtxoNotFound,
    InvalidAmount,
    InvalidPubkey,
}

/// Value copy of an entry handed across component boundaries.
#[derive(Clone, Debug)]
pub struct SnodeInfo {
    pub outpoint: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub operator_pubkey: PublicKey,
    pub sig_time: i64,
    pub last_ping_time: i64,
    pub protocol_version: i32,
    pub active_state: ActiveState,
    pub payee_script: Vec<u8>,
    pub last_paid_block: i64,
    pub pose_verified: bool,
    pub pose_ban_score: i32,
    pub pose_ban_until_height: i64,
}

/// Inputs `check` needs from outside the registry lock.
pub struct CheckContext<'a> {
    pub now: i64,
    pub height: i64,
    pub collateral_unspent: bool,
    pub sentinel_active: bool,
    pub min_payment_proto: i32,
    pub registry_size: usize,
    pub network: Network,
    pub list_synced: bool,
    pub local_operator_key: Option<&'a PublicKey>,
    pub local_protocol_version: i32,
    pub force: bool,
}

#[derive(Clone, Debug)]
pub struct SnodeEntry {
    pub outpoint: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub operator_pubkey: PublicKey,
    pub sig: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: i32,
    pub last_ping: Option<SnodePing>,
    pub collateral_min_conf_block_hash: Hash256,
    pub active_state: ActiveState,
    pub pose_ban_score: i32,
    pub pose_ban_until_height: i64,
    pub last_paid_block: i64,
    pub last_paid_time: i64,
    pub allow_mixing: bool,
    pub last_queue_seq: u64,
    pub governance_votes: BTreeMap<Hash256, u32>,
    time_last_checked: i64,
}

impl SnodeEntry {
    pub fn from_broadcast(mnb: &SnodeBroadcast) -> Self {
        Self {
            outpoint: mnb.outpoint.clone(),
            addr: mnb.addr,
            collateral_pubkey: mnb.collateral_pubkey,
            operator_pubkey: mnb.operator_pubkey,
            sig: mnb.sig.clone(),
            sig_time: mnb.sig_time,
            protocol_version: mnb.protocol_version,
            last_ping: Some(mnb.last_ping.clone()),
            collateral_min_conf_block_hash: [0u8; 32],
            active_state: ActiveState::Enabled,
            pose_ban_score: 0,
            pose_ban_until_height: 0,
            last_paid_block: 0,
            last_paid_time: 0,
            allow_mixing: true,
            last_queue_seq: 0,
            governance_votes: BTreeMap::new(),
            time_last_checked: 0,
        }
    }

    pub fn to_broadcast(&self) -> SnodeBroadcast {
        SnodeBroadcast {
            outpoint: self.outpoint.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            operator_pubkey: self.operator_pubkey,
            sig: self.sig.clone(),
            sig_time: self.sig_time,
            protocol_version: self.protocol_version,
            last_ping: self.last_ping.clone().unwrap_or(SnodePing {
                outpoint: self.outpoint.clone(),
                block_hash: [0u8; 32],
                sig_time: 0,
                sig: Vec::new(),
                sentinel_is_current: false,
                sentinel_version: 0,
                daemon_version: 0,
            }),
            recovery: false,
        }
    }

    pub fn info(&self) -> SnodeInfo {
        SnodeInfo {
            outpoint: self.outpoint.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            operator_pubkey: self.operator_pubkey,
            sig_time: self.sig_time,
            last_ping_time: self.last_ping.as_ref().map_or(0, |ping| ping.sig_time),
            protocol_version: self.protocol_version,
            active_state: self.active_state,
            payee_script: self.payee_script(),
            last_paid_block: self.last_paid_block,
            pose_verified: self.is_pose_verified(),
            pose_ban_score: self.pose_ban_score,
            pose_ban_until_height: self.pose_ban_until_height,
        }
    }

    /// Rewards pay to the collateral key, never the hot operator key.
    pub fn payee_script(&self) -> Vec<u8> {
        script_for_key(&self.collateral_pubkey)
    }

    pub fn is_enabled(&self) -> bool {
        self.active_state == ActiveState::Enabled
    }

    pub fn is_pose_banned(&self) -> bool {
        self.active_state == ActiveState::PoseBan
    }

    pub fn is_pose_verified(&self) -> bool {
        self.pose_ban_score <= -SNODE_POSE_BAN_MAX_SCORE
    }

    pub fn is_valid_for_payment(&self) -> bool {
        self.is_enabled() && !self.is_pose_banned()
    }

    pub fn increase_pose_ban_score(&mut self) {
        if self.pose_ban_score < SNODE_POSE_BAN_MAX_SCORE {
            self.pose_ban_score += 1;
        }
    }

    pub fn decrease_pose_ban_score(&mut self) {
        if self.pose_ban_score > -SNODE_POSE_BAN_MAX_SCORE {
            self.pose_ban_score -= 1;
        }
    }

    pub fn pose_ban(&mut self) {
        self.pose_ban_score = SNODE_POSE_BAN_MAX_SCORE;
    }

    pub fn is_pinged_within(&self, seconds: i64, at: i64) -> bool {
        match &self.last_ping {
            Some(ping) => at - ping.sig_time < seconds,
            None => false,
        }
    }

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Deterministic election score against a block hash. Further from the
    /// block hash is better; the furthest wins.
    pub fn calculate_score(&self, block_hash: &Hash256) -> U256 {
        let mut encoder = Encoder::new();
        self.outpoint.consensus_encode(&mut encoder);
        encoder.write_hash(&self.collateral_min_conf_block_hash);
        encoder.write_hash(block_hash);
        U256::from_big_endian(&sha256d(&encoder.into_inner()))
    }

    /// Drive the lifecycle state machine. Rate-limited to once per
    /// `SNODE_CHECK_SECONDS` unless forced.
    pub fn check(&mut self, ctx: &CheckContext) {
        if !ctx.force && ctx.now - self.time_last_checked < SNODE_CHECK_SECONDS {
            return;
        }
        self.time_last_checked = ctx.now;

        // once spent, stop doing the checks
        if self.active_state == ActiveState::OutpointSpent {
            return;
        }
        if !ctx.collateral_unspent {
            self.set_state(ActiveState::OutpointSpent);
            return;
        }

        if self.is_pose_banned() {
            if ctx.height < self.pose_ban_until_height {
                return;
            }
            // unbanned, but still on the edge: a few verifications are
            // needed before its position in the list is solid again
            aurumd_log::log_info!(
                "snode {} is unbanned and back in list now",
                self.outpoint.to_string_short()
            );
            self.decrease_pose_ban_score();
        } else if self.pose_ban_score >= SNODE_POSE_BAN_MAX_SCORE {
            self.set_state(ActiveState::PoseBan);
            // ban for the whole payment cycle
            self.pose_ban_until_height = ctx.height + ctx.registry_size as i64;
            aurumd_log::log_info!(
                "snode {} is banned till block {}",
                self.outpoint.to_string_short(),
                self.pose_ban_until_height
            );
            return;
        }

        let ours = ctx
            .local_operator_key
            .is_some_and(|key| *key == self.operator_pubkey);

        let requires_update = self.protocol_version < ctx.min_payment_proto
            || (ours && self.protocol_version < ctx.local_protocol_version);
        if requires_update {
            self.set_state(ActiveState::UpdateRequired);
            return;
        }

        // keep old snodes on start, give them a chance to receive updates
        let wait_for_ping =
            !ctx.list_synced && !self.is_pinged_within(SNODE_MIN_PING_SECONDS, ctx.now);

        if wait_for_ping && !ours {
            if matches!(
                self.active_state,
                ActiveState::Expired | ActiveState::SentinelPingExpired | ActiveState::NewStartRequired
            ) {
                return;
            }
        }

        if !wait_for_ping || ours {
            if !self.is_pinged_within(SNODE_NEW_START_REQUIRED_SECONDS, ctx.now) {
                self.set_state(ActiveState::NewStartRequired);
                return;
            }
            if !self.is_pinged_within(SNODE_EXPIRATION_SECONDS, ctx.now) {
                self.set_state(ActiveState::Expired);
                return;
            }
            if ctx.sentinel_active
                && !self.is_pinged_within(SNODE_SENTINEL_PING_MAX_SECONDS, ctx.now)
            {
                self.set_state(ActiveState::SentinelPingExpired);
                return;
            }
        }

        // require a ping separate from the broadcast before going ENABLED,
        // except on regtest
        if ctx.network != Network::Regtest {
            let ping_time = self.last_ping.as_ref().map_or(0, |ping| ping.sig_time);
            if ping_time - self.sig_time < SNODE_MIN_PING_SECONDS {
                self.set_state(ActiveState::PreEnabled);
                return;
            }
        }

        if (!wait_for_ping || ours)
            && ctx.sentinel_active
            && !self
                .last_ping
                .as_ref()
                .is_some_and(|ping| ping.sentinel_is_current)
        {
            self.set_state(ActiveState::SentinelPingExpired);
            return;
        }

        self.set_state(ActiveState::Enabled);
    }

    fn set_state(&mut self, state: ActiveState) {
        if self.active_state != state {
            aurumd_log::log_debug!(
                "snode {} is in {} state now",
                self.outpoint.to_string_short(),
                state.as_str()
            );
        }
        self.active_state = state;
    }
}

impl Encodable for SnodeEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_service(&self.addr);
        encoder.write_var_bytes(&self.collateral_pubkey.serialize());
        encoder.write_var_bytes(&self.operator_pubkey.serialize());
        encoder.write_var_bytes(&self.sig);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
        match &self.last_ping {
            Some(ping) => {
                encoder.write_bool(true);
                ping.consensus_encode(encoder);
            }
            None => encoder.write_bool(false),
        }
        encoder.write_hash(&self.collateral_min_conf_block_hash);
        encoder.write_u8(self.active_state.to_u8());
        encoder.write_i32_le(self.pose_ban_score);
        encoder.write_i64_le(self.pose_ban_until_height);
        encoder.write_i64_le(self.last_paid_block);
        encoder.write_i64_le(self.last_paid_time);
        encoder.write_bool(self.allow_mixing);
        encoder.write_u64_le(self.last_queue_seq);
        encoder.write_varint(self.governance_votes.len() as u64);
        for (hash, count) in &self.governance_votes {
            encoder.write_hash(hash);
            encoder.write_u32_le(*count);
        }
    }
}

impl Decodable for SnodeEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let outpoint = OutPoint::consensus_decode(decoder)?;
        let addr = decoder.read_service()?;
        let collateral_pubkey = PublicKey::from_slice(&decoder.read_var_bytes()?)
            .map_err(|_| DecodeError::InvalidData("invalid collateral pubkey"))?;
        let operator_pubkey = PublicKey::from_slice(&decoder.read_var_bytes()?)
            .map_err(|_| DecodeError::InvalidData("invalid operator pubkey"))?;
        let sig = decoder.read_var_bytes()?;
        let sig_time = decoder.read_i64_le()?;
        let protocol_version = decoder.read_i32_le()?;
        let last_ping = if decoder.read_bool()? {
            Some(SnodePing::consensus_decode(decoder)?)
        } else {
            None
        };
        let collateral_min_conf_block_hash = decoder.read_hash()?;
        let active_state = ActiveState::from_u8(decoder.read_u8()?)?;
        let pose_ban_score = decoder.read_i32_le()?;
        let pose_ban_until_height = decoder.read_i64_le()?;
        let last_paid_block = decoder.read_i64_le()?;
        let last_paid_time = decoder.read_i64_le()?;
        let allow_mixing = decoder.read_bool()?;
        let last_queue_seq = decoder.read_u64_le()?;
        let vote_count = decoder.read_varint()?;
        let mut governance_votes = BTreeMap::new();
        for _ in 0..vote_count {
            let hash = decoder.read_hash()?;
            let count = decoder.read_u32_le()?;
            governance_votes.insert(hash, count);
        }
        Ok(Self {
            outpoint,
            addr,
            collateral_pubkey,
            operator_pubkey,
            sig,
            sig_time,
            protocol_version,
            last_ping,
            collateral_min_conf_block_hash,
            active_state,
            pose_ban_score,
            pose_ban_until_height,
            last_paid_block,
            last_paid_time,
            allow_mixing,
            last_queue_seq,
            governance_votes,
            time_last_checked: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::KeyPair;
    use aurumd_consensus::constants::PROTOCOL_VERSION;
    use aurumd_primitives::{decode, encode};

    fn keys(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32]).expect("keys")
    }

    fn entry_with_ping(now: i64, ping_age: i64) -> SnodeEntry {
        let outpoint = OutPoint {
            hash: [0x10; 32],
            index: 0,
        };
        let ping = SnodePing {
            outpoint: outpoint.clone(),
            block_hash: [0x20; 32],
            sig_time: now - ping_age,
            sig: Vec::new(),
            sentinel_is_current: true,
            sentinel_version: 1,
            daemon_version: 1,
        };
        SnodeEntry {
            outpoint,
            addr: "203.0.113.5:7215".parse().expect("addr"),
            collateral_pubkey: keys(1).public,
            operator_pubkey: keys(2).public,
            sig: Vec::new(),
            sig_time: now - SNODE_EXPIRATION_SECONDS,
            protocol_version: PROTOCOL_VERSION,
            last_ping: Some(ping),
            collateral_min_conf_block_hash: [0x30; 32],
            active_state: ActiveState::Enabled,
            pose_ban_score: 0,
            pose_ban_until_height: 0,
            last_paid_block: 0,
            last_paid_time: 0,
            allow_mixing: true,
            last_queue_seq: 0,
            governance_votes: BTreeMap::new(),
            time_last_checked: 0,
        }
    }

    fn ctx(now: i64) -> CheckContext<'static> {
        CheckContext {
            now,
            height: 1000,
            collateral_unspent: true,
            sentinel_active: false,
            min_payment_proto: PROTOCOL_VERSION,
            registry_size: 10,
            network: Network::Mainnet,
            list_synced: true,
            local_operator_key: None,
            local_protocol_version: PROTOCOL_VERSION,
            force: true,
        }
    }

    #[test]
    fn fresh_ping_keeps_enabled() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        entry.check(&ctx(now));
        assert_eq!(entry.active_state, ActiveState::Enabled);
    }

    #[test]
    fn expiration_ladder() {
        let now = 1_700_000_000;

        let mut entry = entry_with_ping(now, SNODE_EXPIRATION_SECONDS + 1);
        entry.check(&ctx(now));
        assert_eq!(entry.active_state, ActiveState::Expired);

        let mut entry = entry_with_ping(now, SNODE_NEW_START_REQUIRED_SECONDS + 1);
        entry.check(&ctx(now));
        assert_eq!(entry.active_state, ActiveState::NewStartRequired);
    }

    #[test]
    fn spent_collateral_is_terminal() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        let mut context = ctx(now);
        context.collateral_unspent = false;
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::OutpointSpent);

        // state survives the collateral coming back (reorg noise)
        context.collateral_unspent = true;
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::OutpointSpent);
    }

    #[test]
    fn outdated_proto_requires_update() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        entry.protocol_version = PROTOCOL_VERSION - 1;
        entry.check(&ctx(now));
        assert_eq!(entry.active_state, ActiveState::UpdateRequired);
    }

    #[test]
    fn recent_broadcast_stays_pre_enabled() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        // broadcast and ping minted at almost the same moment
        entry.sig_time = now - 90;
        entry.check(&ctx(now));
        assert_eq!(entry.active_state, ActiveState::PreEnabled);
    }

    #[test]
    fn pose_ban_holds_until_height() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        entry.pose_ban_score = SNODE_POSE_BAN_MAX_SCORE;
        let mut context = ctx(now);
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::PoseBan);
        assert_eq!(entry.pose_ban_until_height, 1000 + 10);

        // still banned one block before the release height
        context.now += SNODE_CHECK_SECONDS + 1;
        context.height = entry.pose_ban_until_height - 1;
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::PoseBan);

        // released at the ban height, score steps back from the edge
        context.now += SNODE_CHECK_SECONDS + 1;
        context.height = entry.pose_ban_until_height;
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::Enabled);
        assert_eq!(entry.pose_ban_score, SNODE_POSE_BAN_MAX_SCORE - 1);
    }

    #[test]
    fn sentinel_expiry() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        if let Some(ping) = entry.last_ping.as_mut() {
            ping.sentinel_is_current = false;
        }
        let mut context = ctx(now);
        context.sentinel_active = true;
        entry.check(&context);
        assert_eq!(entry.active_state, ActiveState::SentinelPingExpired);
    }

    #[test]
    fn score_is_deterministic() {
        let now = 1_700_000_000;
        let entry = entry_with_ping(now, 60);
        let block_hash = [0x77; 32];
        assert_eq!(
            entry.calculate_score(&block_hash),
            entry.calculate_score(&block_hash)
        );
        assert_ne!(
            entry.calculate_score(&block_hash),
            entry.calculate_score(&[0x78; 32])
        );
    }

    #[test]
    fn cache_round_trip() {
        let now = 1_700_000_000;
        let mut entry = entry_with_ping(now, 60);
        entry.governance_votes.insert([0x42; 32], 3);
        entry.pose_ban_score = -2;
        let decoded: SnodeEntry = decode(&encode(&entry)).expect("decode");
        assert_eq!(decoded.outpoint, entry.outpoint);
        assert_eq!(decoded.active_state, entry.active_state);
        assert_eq!(decoded.pose_ban_score, -2);
        assert_eq!(decoded.governance_votes.get(&[0x42; 32]), Some(&3));
    }
}
