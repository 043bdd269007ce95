//! Block subsidy and service-node payment schedule.

use crate::money::{Amount, COIN};
use crate::params::ChainParams;

const SUBSIDY_HALVING_INTERVAL: i64 = 840_000;

pub fn block_subsidy(height: i64, _params: &ChainParams) -> Amount {
    let mut subsidy = 50 * COIN;
    if height == 0 {
        return 0;
    }
    let halvings = (height - 1) / SUBSIDY_HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    subsidy >>= halvings;
    subsidy
}

/// Share of the block reward owed to the elected service node.
///
/// Starts at 20% once payments activate and steps up five percentage
/// points per interval until it settles at 50%.
pub fn snode_payment(height: i64, block_reward: Amount, params: &ChainParams) -> Amount {
    let start = params.snode.payments_start_height;
    if height < start {
        return 0;
    }

    let steps = (height - start) / params.snode.payment_step_interval;
    let percent = (20 + steps.min(6) * 5).min(50);
    block_reward * percent / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{chain_params, Network};

    #[test]
    fn subsidy_halves() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(block_subsidy(1, &params), 50 * COIN);
        assert_eq!(block_subsidy(SUBSIDY_HALVING_INTERVAL, &params), 50 * COIN);
        assert_eq!(
            block_subsidy(SUBSIDY_HALVING_INTERVAL + 1, &params),
            25 * COIN
        );
    }

    #[test]
    fn snode_share_steps_up() {
        let params = chain_params(Network::Mainnet);
        let start = params.snode.payments_start_height;
        let interval = params.snode.payment_step_interval;
        let reward = 50 * COIN;

        assert_eq!(snode_payment(start - 1, reward, &params), 0);
        assert_eq!(snode_payment(start, reward, &params), reward / 5);
        assert_eq!(
            snode_payment(start + interval, reward, &params),
            reward / 4
        );
        // share is capped at one half
        assert_eq!(
            snode_payment(start + interval * 40, reward, &params),
            reward / 2
        );
    }
}
