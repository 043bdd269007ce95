//! Per-network chain parameters.

use crate::money::{Amount, COIN};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }
}

/// Service-node subsystem parameters.
#[derive(Clone, Debug)]
pub struct SnodeParams {
    /// Exact collateral a service-node UTXO must lock.
    pub collateral_amount: Amount,
    /// Confirmations the collateral needs before a broadcast is accepted.
    pub min_confirmations: i64,
    /// Height at which snode payments become part of coinbase validation.
    pub payments_start_height: i64,
    /// Blocks between steps of the payment share schedule.
    pub payment_step_interval: i64,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub default_port: u16,
    /// Regtest runs several nodes on one host, so port checks are skipped.
    pub allow_multiple_ports: bool,
    pub snode: SnodeParams,
    /// First height at which governance superblocks may trigger.
    pub superblock_start_height: i64,
    pub superblock_cycle: i64,
    /// Legacy budget window, kept for validating deeply-buried blocks.
    pub budget_payments_start_height: i64,
    pub budget_payments_cycle_blocks: i64,
    pub budget_payments_window_blocks: i64,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            default_port: 7215,
            allow_multiple_ports: false,
            snode: SnodeParams {
                collateral_amount: 1000 * COIN,
                min_confirmations: 15,
                payments_start_height: 50_000,
                payment_step_interval: 100_000,
            },
            superblock_start_height: 120_000,
            superblock_cycle: 16_616,
            budget_payments_start_height: 60_000,
            budget_payments_cycle_blocks: 16_616,
            budget_payments_window_blocks: 100,
        },
        Network::Testnet => ChainParams {
            network,
            default_port: 17_215,
            allow_multiple_ports: false,
            snode: SnodeParams {
                collateral_amount: 1000 * COIN,
                min_confirmations: 15,
                payments_start_height: 1000,
                payment_step_interval: 2000,
            },
            superblock_start_height: 4200,
            superblock_cycle: 24,
            budget_payments_start_height: 2000,
            budget_payments_cycle_blocks: 50,
            budget_payments_window_blocks: 10,
        },
        Network::Regtest => ChainParams {
            network,
            default_port: 18_215,
            allow_multiple_ports: true,
            snode: SnodeParams {
                collateral_amount: 1000 * COIN,
                min_confirmations: 1,
                payments_start_height: 240,
                payment_step_interval: 10,
            },
            superblock_start_height: 1500,
            superblock_cycle: 10,
            budget_payments_start_height: 1000,
            budget_payments_cycle_blocks: 50,
            budget_payments_window_blocks: 10,
        },
    }
}
