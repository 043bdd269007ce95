//! Gossip message types of the coordination layer.
//!
//! Each message carries its own signature; hashing and signature payloads
//! follow the dual modern/legacy scheme described in `signing`.

use std::net::SocketAddr;

use aurumd_consensus::Hash256;
use aurumd_primitives::hash::hash256_hex;
use aurumd_primitives::{sha256d, Decodable, DecodeError, Decoder, Encodable, Encoder, OutPoint};
use secp256k1::PublicKey;

use crate::chain::ChainView;
use crate::entry::SNODE_NEW_START_REQUIRED_SECONDS;
use crate::signing::{self, KeyPair};
use crate::Rejection;

/// Pings reference the block this many blocks behind the tip.
pub const PING_BLOCK_DEPTH: i64 = 12;

/// Pings referencing a block deeper than this behind the tip are stale.
pub const PING_MAX_BLOCK_AGE: i64 = 24;

/// Timestamps this far in the future are rejected outright.
pub const MAX_FUTURE_SIG_TIME: i64 = 60 * 60;

fn write_pubkey(encoder: &mut Encoder, key: &PublicKey) {
    encoder.write_var_bytes(&key.serialize());
}

fn read_pubkey(decoder: &mut Decoder) -> Result<PublicKey, DecodeError> {
    let bytes = decoder.read_var_bytes()?;
    PublicKey::from_slice(&bytes).map_err(|_| DecodeError::InvalidData("invalid public key"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnodePing {
    pub outpoint: OutPoint,
    pub block_hash: Hash256,
    pub sig_time: i64,
    pub sig: Vec<u8>,
    pub sentinel_is_current: bool,
    pub sentinel_version: u32,
    pub daemon_version: u32,
}

impl SnodePing {
    /// Mint a ping referencing the block `PING_BLOCK_DEPTH` behind the tip.
    pub fn new(outpoint: OutPoint, chain: &dyn ChainView) -> Option<Self> {
        let tip = chain.tip_height();
        if tip < PING_BLOCK_DEPTH {
            return None;
        }
        let block_hash = chain.block_hash(tip - PING_BLOCK_DEPTH)?;
        Some(Self {
            outpoint,
            block_hash,
            sig_time: 0,
            sig: Vec::new(),
            sentinel_is_current: false,
            sentinel_version: 0,
            daemon_version: aurumd_consensus::constants::CLIENT_VERSION,
        })
    }

    pub fn hash(&self, new_sigs: bool) -> Hash256 {
        let mut encoder = Encoder::new();
        if new_sigs {
            self.outpoint.consensus_encode(&mut encoder);
            encoder.write_hash(&self.block_hash);
            encoder.write_i64_le(self.sig_time);
            encoder.write_bool(self.sentinel_is_current);
            encoder.write_u32_le(self.sentinel_version);
            encoder.write_u32_le(self.daemon_version);
        } else {
            // legacy hashing kept the dummy input fields
            self.outpoint.consensus_encode(&mut encoder);
            encoder.write_u8(0);
            encoder.write_u32_le(0xffff_ffff);
            encoder.write_i64_le(self.sig_time);
        }
        sha256d(&encoder.into_inner())
    }

    fn legacy_message(&self) -> String {
        format!(
            "{}{}{}",
            self.outpoint,
            hash256_hex(&self.block_hash),
            self.sig_time
        )
    }

    pub fn sign(&mut self, keys: &KeyPair, new_sigs: bool, adjusted_now: i64) {
        self.sig_time = adjusted_now;
        self.sig = if new_sigs {
            signing::sign_hash(&keys.secret, &self.hash(true))
        } else {
            signing::sign_message(&keys.secret, &self.legacy_message())
        };
    }

    /// Modern first, legacy as fallback.
    pub fn verify_signature(&self, operator_key: &PublicKey) -> Result<(), Rejection> {
        if signing::verify_hash(operator_key, &self.hash(true), &self.sig).is_ok() {
            return Ok(());
        }
        signing::verify_message(operator_key, &self.legacy_message(), &self.sig)
            .map_err(|_| Rejection::ban("bad snode ping signature", 33))
    }

    pub fn simple_check(&self, chain: &dyn ChainView, adjusted_now: i64) -> Result<(), Rejection> {
        if self.sig_time > adjusted_now + MAX_FUTURE_SIG_TIME {
            return Err(Rejection::ban("ping signature too far into the future", 1));
        }
        if chain.block_height(&self.block_hash).is_none() {
            // we may be stuck or forked, do not penalize the sender
            return Err(Rejection::new("ping references an unknown block"));
        }
        Ok(())
    }

    /// Seen-map expiry: a ping this old no longer proves anything.
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.sig_time > SNODE_NEW_START_REQUIRED_SECONDS
    }
}

impl Encodable for SnodePing {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_hash(&self.block_hash);
        encoder.write_i64_le(self.sig_time);
        encoder.write_var_bytes(&self.sig);
        encoder.write_bool(self.sentinel_is_current);
        encoder.write_u32_le(self.sentinel_version);
        encoder.write_u32_le(self.daemon_version);
    }
}

impl Decodable for SnodePing {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            outpoint: OutPoint::consensus_decode(decoder)?,
            block_hash: decoder.read_hash()?,
            sig_time: decoder.read_i64_le()?,
            sig: decoder.read_var_bytes()?,
            sentinel_is_current: decoder.read_bool()?,
            sentinel_version: decoder.read_u32_le()?,
            daemon_version: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SnodeBroadcast {
    pub outpoint: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub operator_pubkey: PublicKey,
    pub sig: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: i32,
    pub last_ping: SnodePing,
    /// Set on broadcasts replayed through quorum recovery; never serialized.
    pub recovery: bool,
}

impl SnodeBroadcast {
    /// Dedup identity of a broadcast; intentionally narrower than the full
    /// serialization so refreshed pings do not change it.
    pub fn dedup_hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.outpoint.consensus_encode(&mut encoder);
        encoder.write_u8(0);
        encoder.write_u32_le(0xffff_ffff);
        write_pubkey(&mut encoder, &self.collateral_pubkey);
        encoder.write_i64_le(self.sig_time);
        sha256d(&encoder.into_inner())
    }

    pub fn signature_hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.outpoint.consensus_encode(&mut encoder);
        encoder.write_service(&self.addr);
        write_pubkey(&mut encoder, &self.collateral_pubkey);
        write_pubkey(&mut encoder, &self.operator_pubkey);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
        sha256d(&encoder.into_inner())
    }

    fn legacy_message(&self) -> String {
        let collateral_id = self.collateral_pubkey.serialize();
        let operator_id = self.operator_pubkey.serialize();
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            hex_bytes(&aurumd_primitives::hash::hash160(&collateral_id)),
            hex_bytes(&aurumd_primitives::hash::hash160(&operator_id)),
            self.protocol_version
        )
    }

    pub fn sign(&mut self, collateral_keys: &KeyPair, new_sigs: bool, adjusted_now: i64) {
        self.sig_time = adjusted_now;
        self.sig = if new_sigs {
            signing::sign_hash(&collateral_keys.secret, &self.signature_hash())
        } else {
            signing::sign_message(&collateral_keys.secret, &self.legacy_message())
        };
    }

    pub fn verify_signature(&self) -> Result<(), Rejection> {
        if signing::verify_hash(&self.collateral_pubkey, &self.signature_hash(), &self.sig).is_ok()
        {
            return Ok(());
        }
        signing::verify_message(&self.collateral_pubkey, &self.legacy_message(), &self.sig)
            .map_err(|_| Rejection::ban("bad snode announce signature", 100))
    }
}

impl Encodable for SnodeBroadcast {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_service(&self.addr);
        write_pubkey(encoder, &self.collateral_pubkey);
        write_pubkey(encoder, &self.operator_pubkey);
        encoder.write_var_bytes(&self.sig);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
        self.last_ping.consensus_encode(encoder);
    }
}

impl Decodable for SnodeBroadcast {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            outpoint: OutPoint::consensus_decode(decoder)?,
            addr: decoder.read_service()?,
            collateral_pubkey: read_pubkey(decoder)?,
            operator_pubkey: read_pubkey(decoder)?,
            sig: decoder.read_var_bytes()?,
            sig_time: decoder.read_i64_le()?,
            protocol_version: decoder.read_i32_le()?,
            last_ping: SnodePing::consensus_decode(decoder)?,
            recovery: false,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentVote {
    pub voter_outpoint: OutPoint,
    pub block_height: i64,
    pub payee_script: Vec<u8>,
    pub sig: Vec<u8>,
}

impl PaymentVote {
    pub fn new(voter_outpoint: OutPoint, block_height: i64, payee_script: Vec<u8>) -> Self {
        Self {
            voter_outpoint,
            block_height,
            payee_script,
            sig: Vec::new(),
        }
    }

    /// Canonical vote identity; also the modern signature payload.
    pub fn vote_hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_var_bytes(&self.payee_script);
        encoder.write_i64_le(self.block_height);
        self.voter_outpoint.consensus_encode(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    fn legacy_message(&self) -> String {
        format!(
            "{}{}{}",
            self.voter_outpoint.to_string_short(),
            self.block_height,
            hex_bytes(&self.payee_script)
        )
    }

    pub fn sign(&mut self, operator_keys: &KeyPair, new_sigs: bool) {
        self.sig = if new_sigs {
            signing::sign_hash(&operator_keys.secret, &self.vote_hash())
        } else {
            signing::sign_message(&operator_keys.secret, &self.legacy_message())
        };
    }

    pub fn verify_signature(&self, operator_key: &PublicKey) -> Result<(), &'static str> {
        if signing::verify_hash(operator_key, &self.vote_hash(), &self.sig).is_ok() {
            return Ok(());
        }
        signing::verify_message(operator_key, &self.legacy_message(), &self.sig)
    }
}

impl Encodable for PaymentVote {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.voter_outpoint.consensus_encode(encoder);
        encoder.write_i64_le(self.block_height);
        encoder.write_var_bytes(&self.payee_script);
        encoder.write_var_bytes(&self.sig);
    }
}

impl Decodable for PaymentVote {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            voter_outpoint: OutPoint::consensus_decode(decoder)?,
            block_height: decoder.read_i64_le()?,
            payee_script: decoder.read_var_bytes()?,
            sig: decoder.read_var_bytes()?,
        })
    }
}

/// Two-party proof-of-service attestation. The same wire shape serves as
/// probe (no signatures), reply (sig1 only), and testimony (both).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnodeVerification {
    pub addr: SocketAddr,
    pub nonce: u32,
    pub block_height: i64,
    pub responder_outpoint: OutPoint,
    pub verifier_outpoint: OutPoint,
    pub sig1: Vec<u8>,
    pub sig2: Vec<u8>,
}

impl SnodeVerification {
    pub fn new(addr: SocketAddr, nonce: u32, block_height: i64) -> Self {
        Self {
            addr,
            nonce,
            block_height,
            responder_outpoint: OutPoint::null(),
            verifier_outpoint: OutPoint::null(),
            sig1: Vec::new(),
            sig2: Vec::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.sig1.is_empty()
    }

    pub fn is_reply(&self) -> bool {
        !self.sig1.is_empty() && self.sig2.is_empty()
    }

    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_service(&self.addr);
        encoder.write_u32_le(self.nonce);
        encoder.write_i64_le(self.block_height);
        sha256d(&encoder.into_inner())
    }

    pub fn signature_hash1(&self, block_hash: &Hash256) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_service(&self.addr);
        encoder.write_u32_le(self.nonce);
        encoder.write_hash(block_hash);
        sha256d(&encoder.into_inner())
    }

    pub fn signature_hash2(&self, block_hash: &Hash256) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_service(&self.addr);
        encoder.write_u32_le(self.nonce);
        encoder.write_hash(block_hash);
        self.responder_outpoint.consensus_encode(&mut encoder);
        self.verifier_outpoint.consensus_encode(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn legacy_message1(&self, block_hash: &Hash256) -> String {
        format!("{}{}{}", self.addr.ip(), self.nonce, hash256_hex(block_hash))
    }

    pub fn legacy_message2(&self, block_hash: &Hash256) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr.ip(),
            self.nonce,
            hash256_hex(block_hash),
            self.responder_outpoint.to_string_short(),
            self.verifier_outpoint.to_string_short()
        )
    }
}

impl Encodable for SnodeVerification {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_service(&self.addr);
        encoder.write_u32_le(self.nonce);
        encoder.write_i64_le(self.block_height);
        self.responder_outpoint.consensus_encode(encoder);
        self.verifier_outpoint.consensus_encode(encoder);
        encoder.write_var_bytes(&self.sig1);
        encoder.write_var_bytes(&self.sig2);
    }
}

impl Decodable for SnodeVerification {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            addr: decoder.read_service()?,
            nonce: decoder.read_u32_le()?,
            block_height: decoder.read_i64_le()?,
            responder_outpoint: OutPoint::consensus_decode(decoder)?,
            verifier_outpoint: OutPoint::consensus_decode(decoder)?,
            sig1: decoder.read_var_bytes()?,
            sig2: decoder.read_var_bytes()?,
        })
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurumd_primitives::{decode, encode};

    fn keys(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32]).expect("keys")
    }

    fn sample_ping() -> SnodePing {
        SnodePing {
            outpoint: OutPoint {
                hash: [0x22; 32],
                index: 1,
            },
            block_hash: [0x33; 32],
            sig_time: 1_700_000_000,
            sig: Vec::new(),
            sentinel_is_current: true,
            sentinel_version: 0x0001_0002,
            daemon_version: 1_02_00_00,
        }
    }

    fn sample_broadcast() -> SnodeBroadcast {
        SnodeBroadcast {
            outpoint: OutPoint {
                hash: [0x22; 32],
                index: 1,
            },
            addr: "203.0.113.5:7215".parse().expect("addr"),
            collateral_pubkey: keys(1).public,
            operator_pubkey: keys(2).public,
            sig: Vec::new(),
            sig_time: 1_700_000_000,
            protocol_version: 70212,
            last_ping: sample_ping(),
            recovery: false,
        }
    }

    #[test]
    fn ping_round_trip_and_signatures() {
        let operator = keys(2);
        for new_sigs in [true, false] {
            let mut ping = sample_ping();
            ping.sign(&operator, new_sigs, 1_700_000_100);
            let decoded: SnodePing = decode(&encode(&ping)).expect("decode");
            assert_eq!(decoded, ping);
            assert!(decoded.verify_signature(&operator.public).is_ok());
            assert!(decoded.verify_signature(&keys(9).public).is_err());
        }
    }

    #[test]
    fn broadcast_round_trip_and_signatures() {
        let collateral = keys(1);
        for new_sigs in [true, false] {
            let mut mnb = sample_broadcast();
            mnb.sign(&collateral, new_sigs, 1_700_000_100);
            let bytes = encode(&mnb);
            let decoded: SnodeBroadcast = decode(&bytes).expect("decode");
            assert_eq!(decoded.dedup_hash(), mnb.dedup_hash());
            assert!(decoded.verify_signature().is_ok());
        }
    }

    #[test]
    fn broadcast_signature_covers_addr() {
        let collateral = keys(1);
        let mut mnb = sample_broadcast();
        mnb.sign(&collateral, true, 1_700_000_100);
        mnb.addr = "203.0.113.6:7215".parse().expect("addr");
        assert!(mnb.verify_signature().is_err());
    }

    #[test]
    fn vote_round_trip_and_signatures() {
        let operator = keys(2);
        for new_sigs in [true, false] {
            let mut vote = PaymentVote::new(
                OutPoint {
                    hash: [0x44; 32],
                    index: 0,
                },
                1010,
                vec![0x76, 0xa9, 0x14],
            );
            vote.sign(&operator, new_sigs);
            let decoded: PaymentVote = decode(&encode(&vote)).expect("decode");
            assert_eq!(decoded, vote);
            assert!(decoded.verify_signature(&operator.public).is_ok());
        }
    }

    #[test]
    fn vote_hash_is_stable_across_signing() {
        let operator = keys(2);
        let mut vote = PaymentVote::new(
            OutPoint {
                hash: [0x44; 32],
                index: 0,
            },
            1010,
            vec![0x76],
        );
        let unsigned = vote.vote_hash();
        vote.sign(&operator, true);
        assert_eq!(vote.vote_hash(), unsigned);
    }

    #[test]
    fn verification_shapes() {
        let addr: SocketAddr = "203.0.113.5:7215".parse().expect("addr");
        let mut mnv = SnodeVerification::new(addr, 42, 990);
        assert!(mnv.is_request());
        mnv.sig1 = vec![1];
        assert!(mnv.is_reply());
        mnv.sig2 = vec![2];
        assert!(!mnv.is_request() && !mnv.is_reply());

        let decoded: SnodeVerification = decode(&encode(&mnv)).expect("decode");
        assert_eq!(decoded, mnv);
    }
}
