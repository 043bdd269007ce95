//! Local activation state machine and the pinger.

mod common;

use aurumd_primitives::secret_key_to_wif;
use aurumd_snode::active::ActivatorState;
use aurumd_snode::config::CoreConfig;
use aurumd_snode::entry::SNODE_MIN_PING_SECONDS;
use common::{bed_with_config, test_network, test_snode};

const TIP: i64 = 130_000;

fn snode_config(operator_seed: u8, external_ip: Option<std::net::SocketAddr>) -> CoreConfig {
    let wif = secret_key_to_wif(&[operator_seed; 32], test_network());
    CoreConfig {
        network: test_network(),
        snode_mode: true,
        operator_wif: Some(wif),
        external_ip,
        ..CoreConfig::default()
    }
}

#[test]
fn activator_starts_when_network_sees_us() {
    let node = test_snode(1, test_network());
    let bed = bed_with_config(snode_config(101, Some(node.addr)), TIP);
    bed.finish_sync();
    node.register(&bed);

    bed.core.activator.manage_state(&bed.core.registry);

    assert_eq!(bed.core.activator.state(), ActivatorState::Started);
    assert_eq!(bed.core.local.active_outpoint(), Some(node.outpoint.clone()));
    assert_eq!(bed.core.activator.status_string(), "Snode successfully started");
}

#[test]
fn pinger_respects_the_ping_interval() {
    let node = test_snode(2, test_network());
    let bed = bed_with_config(snode_config(102, Some(node.addr)), TIP);
    bed.finish_sync();
    node.register(&bed);

    bed.core.activator.manage_state(&bed.core.registry);
    assert_eq!(bed.core.activator.state(), ActivatorState::Started);
    let before = bed
        .core
        .registry
        .get_info(&node.outpoint)
        .expect("entry")
        .last_ping_time;

    // within the window nothing is sent
    assert!(!bed.core.activator.send_snode_ping(&bed.core.registry));

    // once the window passes a fresh ping lands in the registry
    bed.clock.advance(SNODE_MIN_PING_SECONDS + 30);
    assert!(bed.core.activator.send_snode_ping(&bed.core.registry));
    let after = bed
        .core
        .registry
        .get_info(&node.outpoint)
        .expect("entry")
        .last_ping_time;
    assert!(after > before);
}

#[test]
fn failed_self_probe_blocks_activation() {
    let node = test_snode(3, test_network());
    let bed = bed_with_config(snode_config(103, Some(node.addr)), TIP);
    bed.finish_sync();
    node.register(&bed);
    bed.net.set_probe_ok(false);

    bed.core.activator.manage_state(&bed.core.registry);
    assert_eq!(bed.core.activator.state(), ActivatorState::NotCapable);
    assert!(bed
        .core
        .activator
        .status_string()
        .contains("Could not connect"));
}

#[test]
fn wrong_port_blocks_activation_on_mainnet() {
    let node = test_snode(4, test_network());
    let mut wrong = node.addr;
    wrong.set_port(wrong.port() + 1);
    let bed = bed_with_config(snode_config(104, Some(wrong)), TIP);
    bed.finish_sync();
    node.register(&bed);

    bed.core.activator.manage_state(&bed.core.registry);
    assert_eq!(bed.core.activator.state(), ActivatorState::NotCapable);
    assert!(bed.core.activator.status_string().contains("port"));
}

#[test]
fn waits_for_blockchain_sync() {
    let node = test_snode(5, test_network());
    let bed = bed_with_config(snode_config(105, Some(node.addr)), TIP);
    // sync never started: the activator parks itself
    bed.core.activator.manage_state(&bed.core.registry);
    assert_eq!(bed.core.activator.state(), ActivatorState::SyncInProcess);
}

#[test]
fn mismatched_address_blocks_activation() {
    let node = test_snode(6, test_network());
    let elsewhere = common::default_port_addr(test_network(), 77);
    let bed = bed_with_config(snode_config(106, Some(elsewhere)), TIP);
    bed.finish_sync();
    node.register(&bed);

    bed.core.activator.manage_state(&bed.core.registry);
    assert_eq!(bed.core.activator.state(), ActivatorState::NotCapable);
    assert!(bed
        .core
        .activator
        .status_string()
        .contains("does not match"));
}
