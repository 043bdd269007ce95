//! Persisted registry cache: round trip and version wipe.

mod common;

use std::sync::Arc;

use aurumd_snode::config::CoreConfig;
use aurumd_snode::store::CACHE_VERSION;
use aurumd_storage::memory::MemoryStore;
use aurumd_storage::{Column, KeyValueStore};
use common::{bed_with_store, test_network, test_snode};

const TIP: i64 = 130_000;

fn config() -> CoreConfig {
    CoreConfig {
        network: test_network(),
        ..CoreConfig::default()
    }
}

#[test]
fn cache_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let nodes: Vec<_> = (1..=3).map(|seed| test_snode(seed, test_network())).collect();

    {
        let bed = bed_with_store(config(), TIP, Arc::clone(&store));
        bed.finish_sync();
        for node in &nodes {
            node.register(&bed);
        }
        bed.core.flush_cache().expect("flush");
    }

    let bed = bed_with_store(config(), TIP, Arc::clone(&store));
    assert!(bed.core.load_cache().expect("load"));
    assert_eq!(bed.core.registry.size(), 3);
    for node in &nodes {
        let info = bed.core.registry.get_info(&node.outpoint).expect("entry");
        assert_eq!(info.addr, node.addr);
        assert_eq!(info.operator_pubkey, node.operator.public);
    }
}

#[test]
fn version_mismatch_wipes_the_cache() {
    let store = Arc::new(MemoryStore::new());
    {
        let bed = bed_with_store(config(), TIP, Arc::clone(&store));
        bed.finish_sync();
        test_snode(1, test_network()).register(&bed);
        bed.core.flush_cache().expect("flush");
    }
    assert_eq!(
        store.get(Column::Meta, b"version").expect("get"),
        Some(CACHE_VERSION.as_bytes().to_vec())
    );

    // an older daemon wrote this cache
    store
        .put(Column::Meta, b"version", b"snode-cache-v7")
        .expect("put");

    let bed = bed_with_store(config(), TIP, Arc::clone(&store));
    assert!(!bed.core.load_cache().expect("load"));
    assert_eq!(bed.core.registry.size(), 0);
    // the wipe removed everything, including the stale version marker
    assert!(store.get(Column::Meta, b"version").expect("get").is_none());
    assert!(store
        .scan_prefix(Column::Registry, b"")
        .expect("scan")
        .is_empty());
}

#[test]
fn fresh_store_reports_no_cache() {
    let store = Arc::new(MemoryStore::new());
    let bed = bed_with_store(config(), TIP, store);
    assert!(!bed.core.load_cache().expect("load"));
    assert_eq!(bed.core.registry.size(), 0);
}
