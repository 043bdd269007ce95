//! Protocol-wide constants shared across the coordination layer.

/// Current network protocol version for P2P messages.
pub const PROTOCOL_VERSION: i32 = 70212;

/// Oldest protocol version this node will talk to at all.
pub const MIN_PEER_PROTO_VERSION: i32 = 70203;

/// Minimum peer version that can receive and send snode payment messages,
/// vote for a winner and be elected as one.
///
/// V1 is the floor for historical votes, V2 the floor once the
/// pay-updated-nodes spork activates.
pub const MIN_SNODE_PAYMENT_PROTO_V1: i32 = 70206;
pub const MIN_SNODE_PAYMENT_PROTO_V2: i32 = 70210;

/// Minimum version that participates in proof-of-service verification.
pub const MIN_POSE_PROTO_VERSION: i32 = 70203;

/// Minimum version governance objects are exchanged with.
pub const MIN_GOVERNANCE_PROTO_VERSION: i32 = 70206;

/// Protocol version that still wraps DSEG requests in a transaction input.
pub const LEGACY_DSEG_PROTO_VERSION: i32 = 70208;

/// Client (daemon) version reported inside pings.
pub const CLIENT_VERSION: u32 = 1_02_00_00;

/// Message magic used for legacy-format message signatures.
pub const SIGNED_MESSAGE_MAGIC: &str = "Aurum Signed Message:\n";

/// Hard cap on inventory vectors per message, shared with the transport.
pub const MAX_INV_SZ: usize = 50_000;
