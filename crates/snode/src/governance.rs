//! Interface to the external governance subsystem.
//!
//! Governance objects and superblock triggers live outside this layer;
//! the sync controller and payment validation reach them through this
//! trait.

use aurumd_consensus::money::Amount;
use aurumd_primitives::TxOut;

use crate::net::PeerId;

pub trait GovernanceView: Send + Sync {
    fn object_count(&self) -> usize;
    fn vote_count(&self) -> usize;
    /// Ask a peer for votes on objects we still miss; returns how many
    /// objects are left to ask about.
    fn request_object_votes(&self, peer: PeerId) -> usize;
    fn is_superblock_triggered(&self, height: i64) -> bool;
    fn is_valid_superblock(&self, outputs: &[TxOut], height: i64, block_reward: Amount) -> bool;
    /// Opaque MNGOVERNANCESYNC payload handed through.
    fn process_sync_payload(&self, peer: PeerId, payload: &[u8]);
}

/// Stand-in used in lite mode and in tests: no objects, never triggers.
pub struct NullGovernance;

impl GovernanceView for NullGovernance {
    fn object_count(&self) -> usize {
        0
    }

    fn vote_count(&self) -> usize {
        0
    }

    fn request_object_votes(&self, _peer: PeerId) -> usize {
        0
    }

    fn is_superblock_triggered(&self, _height: i64) -> bool {
        false
    }

    fn is_valid_superblock(&self, _outputs: &[TxOut], _height: i64, _block_reward: Amount) -> bool {
        false
    }

    fn process_sync_payload(&self, _peer: PeerId, _payload: &[u8]) {}
}
