//! Transport-facing types.
//!
//! The connection pool, framing, and misbehavior scoring live in the
//! surrounding process. Components enqueue messages through [`NetSink`]
//! and never touch sockets while holding their locks.

use std::net::SocketAddr;

use aurumd_consensus::Hash256;
use aurumd_primitives::{DecodeError, Decodable, Decoder, Encodable, Encoder, OutPoint};

use crate::messages::{PaymentVote, SnodeBroadcast, SnodePing, SnodeVerification};

pub type PeerId = u64;

pub const MSG_SNODE_PAYMENT_VOTE: u32 = 6;
pub const MSG_SNODE_PAYMENT_BLOCK: u32 = 7;
pub const MSG_SNODE_ANNOUNCE: u32 = 14;
pub const MSG_SNODE_PING: u32 = 15;
pub const MSG_SNODE_VERIFY: u32 = 19;

/// Wire command strings (sized to the transport's 12-byte command field).
pub mod commands {
    pub const MNANNOUNCE: &str = "mnb";
    pub const MNPING: &str = "mnp";
    pub const DSEG: &str = "dseg";
    pub const MNPAYMENTSYNC: &str = "mnget";
    pub const MNPAYMENTVOTE: &str = "mnw";
    pub const MNVERIFY: &str = "mnv";
    pub const MNGOVERNANCESYNC: &str = "govsync";
    pub const SYNCSTATUSCOUNT: &str = "ssc";
    pub const GETSPORKS: &str = "getsporks";
    pub const INV: &str = "inv";
    pub const GETDATA: &str = "getdata";
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Inv {
    pub kind: u32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub enum SnodeMessage {
    Announce(SnodeBroadcast),
    Ping(SnodePing),
    /// `None` asks for the full registry, `Some` for one entry.
    Dseg(Option<OutPoint>),
    PaymentSync,
    PaymentVote(PaymentVote),
    Verify(SnodeVerification),
    /// Opaque payload forwarded to the governance layer.
    GovernanceSync(Vec<u8>),
    SyncStatusCount { asset: i32, count: i32 },
    GetSporks,
    Inv(Vec<Inv>),
    GetData(Vec<Inv>),
}

impl SnodeMessage {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Announce(_) => commands::MNANNOUNCE,
            Self::Ping(_) => commands::MNPING,
            Self::Dseg(_) => commands::DSEG,
            Self::PaymentSync => commands::MNPAYMENTSYNC,
            Self::PaymentVote(_) => commands::MNPAYMENTVOTE,
            Self::Verify(_) => commands::MNVERIFY,
            Self::GovernanceSync(_) => commands::MNGOVERNANCESYNC,
            Self::SyncStatusCount { .. } => commands::SYNCSTATUSCOUNT,
            Self::GetSporks => commands::GETSPORKS,
            Self::Inv(_) => commands::INV,
            Self::GetData(_) => commands::GETDATA,
        }
    }
}

fn encode_inv_list(invs: &[Inv]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(invs.len() as u64);
    for inv in invs {
        encoder.write_u32_le(inv.kind);
        encoder.write_hash(&inv.hash);
    }
    encoder.into_inner()
}

fn decode_inv_list(payload: &[u8]) -> Result<Vec<Inv>, DecodeError> {
    let mut decoder = Decoder::new(payload);
    let count = decoder.read_varint()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = decoder.read_u32_le()?;
        let hash = decoder.read_hash()?;
        out.push(Inv { kind, hash });
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(out)
}

/// Frame a message into `(command, payload)` for the transport.
pub fn encode_message(message: &SnodeMessage) -> (&'static str, Vec<u8>) {
    let payload = match message {
        SnodeMessage::Announce(mnb) => aurumd_primitives::encode(mnb),
        SnodeMessage::Ping(mnp) => aurumd_primitives::encode(mnp),
        SnodeMessage::Dseg(None) => Vec::new(),
        SnodeMessage::Dseg(Some(outpoint)) => aurumd_primitives::encode(outpoint),
        SnodeMessage::PaymentSync => Vec::new(),
        SnodeMessage::PaymentVote(vote) => aurumd_primitives::encode(vote),
        SnodeMessage::Verify(mnv) => aurumd_primitives::encode(mnv),
        SnodeMessage::GovernanceSync(payload) => payload.clone(),
        SnodeMessage::SyncStatusCount { asset, count } => {
            let mut encoder = Encoder::new();
            encoder.write_i32_le(*asset);
            encoder.write_i32_le(*count);
            encoder.into_inner()
        }
        SnodeMessage::GetSporks => Vec::new(),
        SnodeMessage::Inv(invs) => encode_inv_list(invs),
        SnodeMessage::GetData(invs) => encode_inv_list(invs),
    };
    (message.command(), payload)
}

/// Parse a framed payload back into a message.
pub fn decode_message(command: &str, payload: &[u8]) -> Result<SnodeMessage, DecodeError> {
    match command {
        commands::MNANNOUNCE => Ok(SnodeMessage::Announce(aurumd_primitives::decode(payload)?)),
        commands::MNPING => Ok(SnodeMessage::Ping(aurumd_primitives::decode(payload)?)),
        commands::DSEG => {
            if payload.is_empty() {
                return Ok(SnodeMessage::Dseg(None));
            }
            if payload.len() == 36 {
                return Ok(SnodeMessage::Dseg(Some(aurumd_primitives::decode(
                    payload,
                )?)));
            }
            // legacy peers wrap the outpoint in a transaction input
            let mut decoder = Decoder::new(payload);
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let _script_sig = decoder.read_var_bytes()?;
            let _sequence = decoder.read_u32_le()?;
            if !decoder.is_empty() {
                return Err(DecodeError::TrailingBytes);
            }
            Ok(SnodeMessage::Dseg(Some(outpoint)))
        }
        commands::MNPAYMENTSYNC => {
            // a legacy storage-limit hint may trail the request; ignore it
            Ok(SnodeMessage::PaymentSync)
        }
        commands::MNPAYMENTVOTE => Ok(SnodeMessage::PaymentVote(aurumd_primitives::decode(
            payload,
        )?)),
        commands::MNVERIFY => Ok(SnodeMessage::Verify(aurumd_primitives::decode(payload)?)),
        commands::MNGOVERNANCESYNC => Ok(SnodeMessage::GovernanceSync(payload.to_vec())),
        commands::SYNCSTATUSCOUNT => {
            let mut decoder = Decoder::new(payload);
            let asset = decoder.read_i32_le()?;
            let count = decoder.read_i32_le()?;
            if !decoder.is_empty() {
                return Err(DecodeError::TrailingBytes);
            }
            Ok(SnodeMessage::SyncStatusCount { asset, count })
        }
        commands::GETSPORKS => Ok(SnodeMessage::GetSporks),
        commands::INV => Ok(SnodeMessage::Inv(decode_inv_list(payload)?)),
        commands::GETDATA => Ok(SnodeMessage::GetData(decode_inv_list(payload)?)),
        _ => Err(DecodeError::InvalidData("unknown command")),
    }
}

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub version: i32,
    pub inbound: bool,
    /// Direct snode connection (recovery / PoSe); unreliable for sync.
    pub snode_conn: bool,
}

pub trait NetSink: Send + Sync {
    fn send(&self, peer: PeerId, message: SnodeMessage);
    /// Announce an inventory item to every connected peer.
    fn relay_inv(&self, inv: Inv);
    /// Queue an inventory announcement for one peer.
    fn push_inventory(&self, peer: PeerId, inv: Inv);
    fn misbehave(&self, peer: PeerId, score: i32);
    fn peers(&self) -> Vec<PeerInfo>;
    /// Ask the pool for a direct snode connection.
    fn connect(&self, addr: SocketAddr);
    fn is_connected(&self, addr: SocketAddr) -> Option<PeerId>;
    fn disconnect(&self, peer: PeerId);
    /// Blocking reachability probe; called without any component lock held.
    fn probe(&self, addr: SocketAddr) -> bool;
    /// Our external address as the network sees it.
    fn local_address(&self) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dseg_payload_shapes() {
        let (command, payload) = encode_message(&SnodeMessage::Dseg(None));
        assert_eq!(command, commands::DSEG);
        assert!(payload.is_empty());
        assert!(matches!(
            decode_message(commands::DSEG, &payload),
            Ok(SnodeMessage::Dseg(None))
        ));

        let outpoint = OutPoint {
            hash: [0x11; 32],
            index: 3,
        };
        let (_, payload) = encode_message(&SnodeMessage::Dseg(Some(outpoint.clone())));
        assert!(matches!(
            decode_message(commands::DSEG, &payload),
            Ok(SnodeMessage::Dseg(Some(decoded))) if decoded == outpoint
        ));
    }

    #[test]
    fn dseg_accepts_legacy_txin_wrapper() {
        let outpoint = OutPoint {
            hash: [0x11; 32],
            index: 3,
        };
        let mut encoder = Encoder::new();
        outpoint.consensus_encode(&mut encoder);
        encoder.write_var_bytes(&[]);
        encoder.write_u32_le(0xffff_ffff);
        let payload = encoder.into_inner();
        assert!(matches!(
            decode_message(commands::DSEG, &payload),
            Ok(SnodeMessage::Dseg(Some(decoded))) if decoded == outpoint
        ));
    }

    #[test]
    fn inv_list_round_trip() {
        let invs = vec![
            Inv {
                kind: MSG_SNODE_ANNOUNCE,
                hash: [1; 32],
            },
            Inv {
                kind: MSG_SNODE_PAYMENT_VOTE,
                hash: [2; 32],
            },
        ];
        let (command, payload) = encode_message(&SnodeMessage::Inv(invs.clone()));
        assert_eq!(command, commands::INV);
        assert!(matches!(
            decode_message(commands::INV, &payload),
            Ok(SnodeMessage::Inv(decoded)) if decoded == invs
        ));
    }

    #[test]
    fn sync_status_count_round_trip() {
        let (command, payload) = encode_message(&SnodeMessage::SyncStatusCount {
            asset: 2,
            count: 17,
        });
        assert!(matches!(
            decode_message(command, &payload),
            Ok(SnodeMessage::SyncStatusCount { asset: 2, count: 17 })
        ));
    }
}
