//! Staged sync progression, timeouts, and the sleep reset.

mod common;

use aurumd_consensus::constants::PROTOCOL_VERSION;
use aurumd_snode::net::commands;
use aurumd_snode::sync::{
    SYNC_ASSET_INITIAL, SYNC_ASSET_LIST, SYNC_ASSET_VOTES, SYNC_ASSET_WAITING,
    SYNC_TIMEOUT_SECONDS,
};
use common::{bed, default_port_addr, test_network};

const TIP: i64 = 130_000;

#[test]
fn staged_sync_reaches_finished() {
    let bed = bed(test_network(), TIP);
    bed.net
        .add_peer(1, default_port_addr(test_network(), 1), PROTOCOL_VERSION);

    let tick = |advance: i64| {
        bed.clock.advance(advance);
        bed.core.sync_tick();
    };

    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_INITIAL);

    // headers are at the tip: straight to the grace period
    tick(6);
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_WAITING);

    // grace period expires into the registry pull
    tick(SYNC_TIMEOUT_SECONDS + 1);
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_LIST);

    // first list tick asks for sporks and the registry dump
    tick(6);
    let commands_sent = bed.net.sent_commands();
    assert!(commands_sent.contains(&commands::GETSPORKS));
    assert!(commands_sent.contains(&commands::DSEG));

    // a silent peer forces the timeout forward
    tick(SYNC_TIMEOUT_SECONDS + 1);
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_VOTES);

    tick(6);
    assert!(bed.net.sent_commands().contains(&commands::MNPAYMENTSYNC));

    tick(SYNC_TIMEOUT_SECONDS + 1);
    assert_eq!(
        bed.core.flags().asset(),
        aurumd_snode::sync::SYNC_ASSET_GOVERNANCE
    );

    tick(6);
    assert!(bed
        .net
        .sent_commands()
        .contains(&commands::MNGOVERNANCESYNC));

    tick(SYNC_TIMEOUT_SECONDS + 1);
    assert!(bed.core.flags().is_synced());
}

#[test]
fn list_stage_without_usable_peers_fails_then_retries() {
    let bed = bed(test_network(), TIP);
    // the only peer is too old to serve the registry
    bed.net.add_peer(
        1,
        default_port_addr(test_network(), 1),
        aurumd_consensus::constants::MIN_SNODE_PAYMENT_PROTO_V1 - 1,
    );

    bed.core.sync_tick();
    bed.clock.advance(SYNC_TIMEOUT_SECONDS + 1);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_LIST);

    // zero attempts at the timeout: there is no way forward, fail
    bed.clock.advance(SYNC_TIMEOUT_SECONDS + 1);
    bed.core.sync_tick();
    assert!(bed.core.flags().is_failed());

    // after the cooldown the controller starts over
    bed.clock.advance(61);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_INITIAL);
}

#[test]
fn sync_resets_after_host_sleep() {
    let bed = bed(test_network(), TIP);
    bed.net
        .add_peer(1, default_port_addr(test_network(), 1), PROTOCOL_VERSION);

    // park the controller in the middle of the pull
    bed.core.sync.switch_next();
    bed.core.sync.switch_next();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_LIST);
    bed.core.sync_tick();

    // the host slept for over an hour: everything restarts
    bed.clock.advance(3700);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_INITIAL);

    // and the machine walks the stages again
    bed.clock.advance(6);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_WAITING);
    bed.clock.advance(SYNC_TIMEOUT_SECONDS + 1);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_LIST);
}

#[test]
fn initial_stage_waits_for_headers() {
    let bed = bed(test_network(), TIP);
    bed.chain.set_headers_state(false, true);
    bed.net
        .add_peer(1, default_port_addr(test_network(), 1), PROTOCOL_VERSION);

    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_INITIAL);

    bed.chain.set_headers_state(true, false);
    bed.core.sync_tick();
    assert_eq!(bed.core.flags().asset(), SYNC_ASSET_WAITING);
}
