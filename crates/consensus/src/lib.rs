//! Consensus constants, chain parameters, and the service-node payment schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;

pub type Hash256 = [u8; 32];

pub use params::{chain_params, ChainParams, Network, SnodeParams};
pub use rewards::{block_subsidy, snode_payment};
