//! On-disk cache of the registry state.
//!
//! A single versioned cache; any version mismatch wipes it and forces a
//! full resync from the network.

use std::net::SocketAddr;

use aurumd_primitives::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use aurumd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::entry::SnodeEntry;
use crate::messages::{SnodeBroadcast, SnodePing};
use crate::registry::{Registry, RegistryExport};

pub const CACHE_VERSION: &str = "snode-cache-v8";

const META_VERSION_KEY: &[u8] = b"version";
const META_SENTINEL_KEY: &[u8] = b"last-sentinel-ping";
const META_QUEUE_SEQ_KEY: &[u8] = b"last-queue-seq";

fn wipe(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    for column in Column::ALL {
        store.clear_column(column)?;
    }
    Ok(())
}

/// Persist the registry snapshot, replacing whatever the cache held.
pub fn save_registry(store: &dyn KeyValueStore, registry: &Registry) -> Result<(), StoreError> {
    let export = registry.export_state();
    wipe(store)?;

    let mut batch = WriteBatch::new();
    batch.put(
        Column::Meta,
        META_VERSION_KEY.to_vec(),
        CACHE_VERSION.as_bytes().to_vec(),
    );
    batch.put(
        Column::Meta,
        META_SENTINEL_KEY.to_vec(),
        export.last_sentinel_ping_time.to_le_bytes().to_vec(),
    );
    batch.put(
        Column::Meta,
        META_QUEUE_SEQ_KEY.to_vec(),
        export.last_queue_seq.to_le_bytes().to_vec(),
    );

    for entry in &export.snodes {
        batch.put(
            Column::Registry,
            aurumd_primitives::encode(&entry.outpoint),
            aurumd_primitives::encode(entry),
        );
    }
    for (hash, seen_at, mnb) in &export.seen_broadcasts {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(*seen_at);
        mnb.consensus_encode(&mut encoder);
        batch.put(Column::SeenBroadcast, hash.to_vec(), encoder.into_inner());
    }
    for (hash, mnp) in &export.seen_pings {
        batch.put(
            Column::SeenPing,
            hash.to_vec(),
            aurumd_primitives::encode(mnp),
        );
    }
    for (hash, deadline, addrs) in &export.recovery_requests {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(*deadline);
        encoder.write_varint(addrs.len() as u64);
        for addr in addrs {
            encoder.write_service(addr);
        }
        batch.put(Column::RecoveryRequest, hash.to_vec(), encoder.into_inner());
    }
    for (hash, replies) in &export.recovery_good_replies {
        let mut encoder = Encoder::new();
        encoder.write_varint(replies.len() as u64);
        for mnb in replies {
            mnb.consensus_encode(&mut encoder);
        }
        batch.put(Column::RecoveryReply, hash.to_vec(), encoder.into_inner());
    }

    store.write_batch(&batch)?;
    aurumd_log::log_info!(
        "flushed snode cache: {} entries, {} seen broadcasts",
        export.snodes.len(),
        export.seen_broadcasts.len()
    );
    Ok(())
}

/// Load the cache into the registry. Returns false (after wiping) when
/// the cache was absent or carried a different version.
pub fn load_registry(store: &dyn KeyValueStore, registry: &Registry) -> Result<bool, StoreError> {
    let version = store.get(Column::Meta, META_VERSION_KEY)?;
    if version.as_deref() != Some(CACHE_VERSION.as_bytes()) {
        if version.is_some() {
            aurumd_log::log_warn!("snode cache version mismatch, wiping cache");
        }
        wipe(store)?;
        return Ok(false);
    }

    let decode_failure = |err: DecodeError| StoreError::Backend(err.to_string());

    let mut export = RegistryExport {
        snodes: Vec::new(),
        seen_broadcasts: Vec::new(),
        seen_pings: Vec::new(),
        recovery_requests: Vec::new(),
        recovery_good_replies: Vec::new(),
        last_sentinel_ping_time: read_meta_i64(store, META_SENTINEL_KEY)?,
        last_queue_seq: read_meta_u64(store, META_QUEUE_SEQ_KEY)?,
    };

    for (_, value) in store.scan_prefix(Column::Registry, &[])? {
        let entry: SnodeEntry = aurumd_primitives::decode(&value).map_err(decode_failure)?;
        export.snodes.push(entry);
    }
    for (key, value) in store.scan_prefix(Column::SeenBroadcast, &[])? {
        let hash = key_hash(&key)?;
        let mut decoder = Decoder::new(&value);
        let seen_at = decoder.read_i64_le().map_err(decode_failure)?;
        let mnb = SnodeBroadcast::consensus_decode(&mut decoder).map_err(decode_failure)?;
        export.seen_broadcasts.push((hash, seen_at, mnb));
    }
    for (key, value) in store.scan_prefix(Column::SeenPing, &[])? {
        let hash = key_hash(&key)?;
        let mnp: SnodePing = aurumd_primitives::decode(&value).map_err(decode_failure)?;
        export.seen_pings.push((hash, mnp));
    }
    for (key, value) in store.scan_prefix(Column::RecoveryRequest, &[])? {
        let hash = key_hash(&key)?;
        let mut decoder = Decoder::new(&value);
        let deadline = decoder.read_i64_le().map_err(decode_failure)?;
        let count = decoder.read_varint().map_err(decode_failure)?;
        let mut addrs: Vec<SocketAddr> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            addrs.push(decoder.read_service().map_err(decode_failure)?);
        }
        export.recovery_requests.push((hash, deadline, addrs));
    }
    for (key, value) in store.scan_prefix(Column::RecoveryReply, &[])? {
        let hash = key_hash(&key)?;
        let mut decoder = Decoder::new(&value);
        let count = decoder.read_varint().map_err(decode_failure)?;
        let mut replies = Vec::with_capacity(count as usize);
        for _ in 0..count {
            replies.push(SnodeBroadcast::consensus_decode(&mut decoder).map_err(decode_failure)?);
        }
        export.recovery_good_replies.push((hash, replies));
    }

    let loaded = export.snodes.len();
    registry.import_state(export);
    aurumd_log::log_info!("loaded snode cache: {} entries", loaded);
    Ok(true)
}

fn key_hash(key: &[u8]) -> Result<aurumd_consensus::Hash256, StoreError> {
    key.try_into()
        .map_err(|_| StoreError::Backend("cache key has the wrong size".to_string()))
}

fn read_meta_i64(store: &dyn KeyValueStore, key: &[u8]) -> Result<i64, StoreError> {
    let Some(raw) = store.get(Column::Meta, key)? else {
        return Ok(0);
    };
    let bytes: [u8; 8] = raw
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::Backend("cache meta value has the wrong size".to_string()))?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_meta_u64(store: &dyn KeyValueStore, key: &[u8]) -> Result<u64, StoreError> {
    let Some(raw) = store.get(Column::Meta, key)? else {
        return Ok(0);
    };
    let bytes: [u8; 8] = raw
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::Backend("cache meta value has the wrong size".to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}
