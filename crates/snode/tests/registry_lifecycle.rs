//! Registry ingest, replacement, rate limiting, and quorum recovery.

mod common;

use aurumd_snode::entry::{
    ActiveState, SNODE_MIN_PING_SECONDS, SNODE_NEW_START_REQUIRED_SECONDS,
};
use common::{bed, test_network, test_snode};

const TIP: i64 = 130_000;

#[test]
fn late_broadcast_wins_replacement() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();
    let now = bed.now();

    let mut node = test_snode(1, test_network());
    node.fund(&bed, TIP - 200);

    let b1 = node.signed_broadcast(&bed, now - 4000, now - 100);
    let outcome = bed
        .core
        .registry
        .process_broadcast(None, b1)
        .expect("b1 accepted");
    assert!(outcome.added);
    let addr1 = bed
        .core
        .registry
        .get_info(&node.outpoint)
        .expect("entry")
        .addr;
    assert_eq!(addr1, node.addr);

    // a strictly newer broadcast moves the entry to its new address
    node.addr = common::default_port_addr(test_network(), 9);
    let b2 = node.signed_broadcast(&bed, now - 4000 + 60, now - 90);
    bed.core
        .registry
        .process_broadcast(None, b2)
        .expect("b2 accepted");
    let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(info.addr, node.addr);

    // an older broadcast must be rejected with no state change
    let old_addr = node.addr;
    node.addr = common::default_port_addr(test_network(), 10);
    let b3 = node.signed_broadcast(&bed, now - 4010, now - 80);
    assert!(bed.core.registry.process_broadcast(None, b3).is_err());
    let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(info.addr, old_addr);
    assert_eq!(bed.core.registry.size(), 1);
}

#[test]
fn redelivered_broadcast_is_idempotent() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();
    let now = bed.now();

    let node = test_snode(2, test_network());
    node.fund(&bed, TIP - 200);
    let mnb = node.signed_broadcast(&bed, now - 4000, now - 100);

    let first = bed
        .core
        .registry
        .process_broadcast(None, mnb.clone())
        .expect("first accepted");
    assert!(first.added);
    let before = bed.core.registry.get_info(&node.outpoint).expect("entry");

    let second = bed
        .core
        .registry
        .process_broadcast(None, mnb)
        .expect("redelivery tolerated");
    assert!(!second.added);
    let after = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(before.sig_time, after.sig_time);
    assert_eq!(before.last_ping_time, after.last_ping_time);
    assert_eq!(bed.core.registry.size(), 1);
}

#[test]
fn redelivered_ping_is_idempotent() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let node = test_snode(3, test_network());
    node.register(&bed);
    let baseline = bed.core.registry.get_info(&node.outpoint).expect("entry");

    bed.clock.advance(700);
    let ping = node.signed_ping(&bed, bed.now());
    bed.core
        .registry
        .process_ping(None, ping.clone())
        .expect("ping accepted");
    let after_first = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert!(after_first.last_ping_time > baseline.last_ping_time);

    // same ping again: a no-op beyond the seen map
    bed.core
        .registry
        .process_ping(None, ping)
        .expect("redelivery tolerated");
    let after_second = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(after_first.last_ping_time, after_second.last_ping_time);
}

#[test]
fn ping_rate_limit() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let node = test_snode(4, test_network());
    node.register(&bed);
    let last_ping = bed
        .core
        .registry
        .get_info(&node.outpoint)
        .expect("entry")
        .last_ping_time;

    // too early by 90 seconds: rejected
    let early = node.signed_ping(&bed, last_ping + SNODE_MIN_PING_SECONDS - 90);
    let err = bed
        .core
        .registry
        .process_ping(None, early)
        .expect_err("early ping rejected");
    assert_eq!(err.ban, 0);

    let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(info.last_ping_time, last_ping);

    // one second past the window: accepted
    let on_time = node.signed_ping(&bed, last_ping + SNODE_MIN_PING_SECONDS + 1);
    bed.core
        .registry
        .process_ping(None, on_time)
        .expect("on-time ping accepted");
    let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(info.last_ping_time, last_ping + SNODE_MIN_PING_SECONDS + 1);
}

#[test]
fn spent_collateral_removes_entry() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let node = test_snode(5, test_network());
    node.register(&bed);
    assert_eq!(bed.core.registry.size(), 1);

    bed.chain.remove_utxo(&node.outpoint);
    bed.clock.advance(10);
    bed.core.registry.check_and_remove();
    assert_eq!(bed.core.registry.size(), 0);
}

#[test]
fn recovery_quorum_restores_entry() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let nodes: Vec<_> = (1..=10)
        .map(|seed| {
            let node = test_snode(seed, test_network());
            node.register(&bed);
            node
        })
        .collect();
    assert_eq!(bed.core.registry.size(), 10);
    let subject = &nodes[0];
    let registered_sig_time = bed
        .core
        .registry
        .get_info(&subject.outpoint)
        .expect("entry")
        .sig_time;

    // let every ping rot past the new-start threshold
    bed.clock.advance(SNODE_NEW_START_REQUIRED_SECONDS + 60);
    bed.core.registry.check_all();
    assert_eq!(
        bed.core
            .registry
            .get_info(&subject.outpoint)
            .expect("entry")
            .active_state,
        ActiveState::NewStartRequired
    );

    // the sweep schedules quorum recovery for the subject
    bed.core.registry.check_and_remove();

    // round one: five good replies and three stale ones; quorum not met
    for (idx, peer) in nodes.iter().enumerate().take(5) {
        let reply = subject.signed_broadcast(&bed, registered_sig_time, bed.now());
        bed.core
            .registry
            .process_broadcast(Some((idx as u64, peer.addr)), reply)
            .expect("reply tolerated");
    }
    for (idx, peer) in nodes.iter().enumerate().skip(5).take(3) {
        let stale = subject.signed_broadcast(&bed, registered_sig_time, registered_sig_time + 10);
        bed.core
            .registry
            .process_broadcast(Some((idx as u64, peer.addr)), stale)
            .expect("stale reply tolerated");
    }
    bed.clock.advance(61);
    bed.core.registry.check_and_remove();
    assert_eq!(
        bed.core
            .registry
            .get_info(&subject.outpoint)
            .expect("entry")
            .active_state,
        ActiveState::NewStartRequired
    );

    // round two after the retry window: six good replies meet the quorum
    bed.clock.advance(3 * 60 * 60 + 61);
    // first sweep retires the exhausted request, the next one re-asks
    bed.core.registry.check_and_remove();
    bed.core.registry.check_and_remove();
    for (idx, peer) in nodes.iter().enumerate().take(6) {
        let reply = subject.signed_broadcast(&bed, registered_sig_time, bed.now());
        bed.core
            .registry
            .process_broadcast(Some((idx as u64, peer.addr)), reply)
            .expect("reply tolerated");
    }
    bed.clock.advance(61);
    bed.core.registry.check_and_remove();

    assert_eq!(
        bed.core
            .registry
            .get_info(&subject.outpoint)
            .expect("entry")
            .active_state,
        ActiveState::Enabled
    );
}

#[test]
fn broadcast_with_wrong_collateral_value_scores_sender() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();
    let now = bed.now();

    let node = test_snode(6, test_network());
    // fund with the wrong amount
    bed.chain.add_utxo(
        node.outpoint.clone(),
        aurumd_snode::chain::Utxo {
            value: 999 * aurumd_consensus::money::COIN,
            script_pubkey: aurumd_snode::signing::script_for_key(&node.collateral.public),
            height: TIP - 200,
        },
    );
    let mnb = node.signed_broadcast(&bed, now - 4000, now - 100);
    let err = bed
        .core
        .registry
        .process_broadcast(None, mnb)
        .expect_err("wrong collateral rejected");
    assert_eq!(err.ban, 33);
    assert_eq!(bed.core.registry.size(), 0);
}

#[test]
fn collateral_key_change_is_rejected() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();
    let now = bed.now();

    let node = test_snode(7, test_network());
    node.register(&bed);

    // same outpoint, different collateral key
    let mut hijack = test_snode(8, test_network());
    hijack.outpoint = node.outpoint.clone();
    hijack.addr = node.addr;
    let mnb = hijack.signed_broadcast(&bed, now - 3000, now - 50);
    let err = bed
        .core
        .registry
        .process_broadcast(None, mnb)
        .expect_err("hijack rejected");
    assert_eq!(err.ban, 33);
    let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
    assert_eq!(info.collateral_pubkey, node.collateral.public);
}
