//! Proof-of-service testimonies and double-signer banning.

mod common;

use aurumd_snode::entry::{ActiveState, SNODE_POSE_BAN_MAX_SCORE};
use aurumd_snode::messages::SnodeVerification;
use aurumd_snode::signing;
use common::{bed, test_network, test_snode, TestBed, TestSnode};

const TIP: i64 = 130_000;

fn testimony(
    bed: &TestBed,
    responder: &TestSnode,
    verifier: &TestSnode,
    nonce: u32,
    height: i64,
) -> SnodeVerification {
    let block_hash = common::hash_at(height);
    let mut mnv = SnodeVerification::new(responder.addr, nonce, height);
    mnv.responder_outpoint = responder.outpoint.clone();
    mnv.verifier_outpoint = verifier.outpoint.clone();
    let new_sigs = bed.core.sporks.new_sigs();
    mnv.sig1 = if new_sigs {
        signing::sign_hash(&responder.operator.secret, &mnv.signature_hash1(&block_hash))
    } else {
        signing::sign_message(&responder.operator.secret, &mnv.legacy_message1(&block_hash))
    };
    mnv.sig2 = if new_sigs {
        signing::sign_hash(&verifier.operator.secret, &mnv.signature_hash2(&block_hash))
    } else {
        signing::sign_message(&verifier.operator.secret, &mnv.legacy_message2(&block_hash))
    };
    mnv
}

#[test]
fn double_signer_is_banned_by_testimonies() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let real = test_snode(1, test_network());
    real.register(&bed);
    // the impostor announces the same endpoint from its own collateral
    let mut impostor = test_snode(2, test_network());
    impostor.addr = real.addr;
    impostor.register(&bed);
    let verifier = test_snode(3, test_network());
    verifier.register(&bed);

    let height = TIP - 1;
    for round in 0..SNODE_POSE_BAN_MAX_SCORE as u32 {
        let mnv = testimony(&bed, &real, &verifier, 1000 + round, height);
        bed.core
            .verifier
            .process_testimony(0, mnv, &bed.core.registry)
            .expect("testimony accepted");
        bed.clock.advance(6);
    }

    let real_info = bed.core.registry.get_info(&real.outpoint).expect("entry");
    assert!(real_info.pose_ban_score < 0);

    let impostor_info = bed
        .core
        .registry
        .get_info(&impostor.outpoint)
        .expect("entry");
    assert_eq!(impostor_info.pose_ban_score, SNODE_POSE_BAN_MAX_SCORE);

    // the lifecycle check converts the score into a ban for a full cycle
    bed.core.registry.check_all();
    let impostor_info = bed
        .core
        .registry
        .get_info(&impostor.outpoint)
        .expect("entry");
    assert_eq!(impostor_info.active_state, ActiveState::PoseBan);
    assert_eq!(
        impostor_info.pose_ban_until_height,
        bed.core.cached_height() + bed.core.registry.size() as i64
    );

    // banned entries never rank
    let ranks = bed.core.registry.get_ranks(height);
    assert!(ranks
        .iter()
        .all(|(_, info)| info.outpoint != impostor.outpoint));
    let (_, winner) = bed
        .core
        .registry
        .next_snode_in_queue(TIP + 10, false, &bed.core.voter);
    if let Some(winner) = winner {
        assert_ne!(winner.outpoint, impostor.outpoint);
    }
}

#[test]
fn self_verification_scores_the_reporter() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let node = test_snode(4, test_network());
    node.register(&bed);

    let mut mnv = testimony(&bed, &node, &node, 7, TIP - 1);
    mnv.verifier_outpoint = node.outpoint.clone();
    let err = bed
        .core
        .verifier
        .process_testimony(0, mnv, &bed.core.registry)
        .expect_err("self verification rejected");
    assert_eq!(err.ban, 100);
}

#[test]
fn stale_testimony_is_ignored() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let responder = test_snode(5, test_network());
    responder.register(&bed);
    let verifier = test_snode(6, test_network());
    verifier.register(&bed);

    // deeper than the PoSe window: dropped without effect
    let mnv = testimony(&bed, &responder, &verifier, 9, TIP - 20);
    bed.core
        .verifier
        .process_testimony(0, mnv, &bed.core.registry)
        .expect("stale testimony tolerated");
    let info = bed
        .core
        .registry
        .get_info(&responder.outpoint)
        .expect("entry");
    assert_eq!(info.pose_ban_score, 0);
}

#[test]
fn bad_verifier_signature_is_rejected() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let responder = test_snode(7, test_network());
    responder.register(&bed);
    let verifier = test_snode(8, test_network());
    verifier.register(&bed);
    let outsider = test_snode(9, test_network());

    let height = TIP - 1;
    let mut mnv = testimony(&bed, &responder, &verifier, 11, height);
    // counter-signature from a key that is not the verifier's
    let block_hash = common::hash_at(height);
    mnv.sig2 = signing::sign_hash(&outsider.operator.secret, &mnv.signature_hash2(&block_hash));

    assert!(bed
        .core
        .verifier
        .process_testimony(0, mnv, &bed.core.registry)
        .is_err());
    let info = bed
        .core
        .registry
        .get_info(&responder.outpoint)
        .expect("entry");
    assert_eq!(info.pose_ban_score, 0);
}

#[test]
fn same_addr_sweep_bans_unverified_duplicates() {
    let bed = bed(test_network(), TIP);
    bed.finish_sync();

    let real = test_snode(10, test_network());
    real.register(&bed);
    let mut squatter = test_snode(11, test_network());
    squatter.addr = real.addr;
    squatter.register(&bed);

    // mark the real one PoSe-verified
    for _ in 0..SNODE_POSE_BAN_MAX_SCORE {
        bed.core.registry.decrease_pose_ban_score(&real.outpoint);
    }
    assert!(bed
        .core
        .registry
        .get_info(&real.outpoint)
        .expect("entry")
        .pose_verified);

    bed.core.verifier.check_same_addr(&bed.core.registry);
    let squatter_info = bed
        .core
        .registry
        .get_info(&squatter.outpoint)
        .expect("entry");
    assert_eq!(squatter_info.pose_ban_score, 1);
    let real_info = bed.core.registry.get_info(&real.outpoint).expect("entry");
    assert!(real_info.pose_ban_score <= -SNODE_POSE_BAN_MAX_SCORE);
}
