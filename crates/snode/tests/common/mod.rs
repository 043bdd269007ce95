//! Shared fixtures: an in-memory chain, a recording transport, and a
//! hand-cranked clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aurumd_consensus::money::COIN;
use aurumd_consensus::{Hash256, Network};
use aurumd_primitives::{sha256d, OutPoint};
use aurumd_snode::chain::{ChainView, Utxo};
use aurumd_snode::clock::Clock;
use aurumd_snode::config::CoreConfig;
use aurumd_snode::governance::NullGovernance;
use aurumd_snode::messages::{SnodeBroadcast, SnodePing};
use aurumd_snode::net::{Inv, NetSink, PeerId, PeerInfo, SnodeMessage};
use aurumd_snode::signing::{script_for_key, KeyPair};
use aurumd_snode::{Core, SharedRng};
use aurumd_storage::memory::MemoryStore;

pub const TEST_GENESIS_TIME: i64 = 1_700_000_000;
pub const BLOCK_SPACING: i64 = 150;

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct MockChainState {
    tip: i64,
    utxos: HashMap<OutPoint, Utxo>,
    headers_at_tip: bool,
    ibd: bool,
}

pub struct MockChain {
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new(tip: i64) -> Self {
        Self {
            state: Mutex::new(MockChainState {
                tip,
                utxos: HashMap::new(),
                headers_at_tip: true,
                ibd: false,
            }),
        }
    }

    pub fn set_tip(&self, tip: i64) {
        self.state.lock().expect("chain lock").tip = tip;
    }

    pub fn set_headers_state(&self, headers_at_tip: bool, ibd: bool) {
        let mut state = self.state.lock().expect("chain lock");
        state.headers_at_tip = headers_at_tip;
        state.ibd = ibd;
    }

    pub fn add_utxo(&self, outpoint: OutPoint, utxo: Utxo) {
        self.state
            .lock()
            .expect("chain lock")
            .utxos
            .insert(outpoint, utxo);
    }

    pub fn remove_utxo(&self, outpoint: &OutPoint) {
        self.state.lock().expect("chain lock").utxos.remove(outpoint);
    }

    pub fn hash_at(height: i64) -> Hash256 {
        sha256d(&height.to_le_bytes())
    }
}

impl ChainView for MockChain {
    fn tip_height(&self) -> i64 {
        self.state.lock().expect("chain lock").tip
    }

    fn block_hash(&self, height: i64) -> Option<Hash256> {
        let tip = self.tip_height();
        if height < 0 || height > tip {
            return None;
        }
        Some(Self::hash_at(height))
    }

    fn block_height(&self, hash: &Hash256) -> Option<i64> {
        let tip = self.tip_height();
        (0..=tip).find(|height| Self::hash_at(*height) == *hash)
    }

    fn block_time(&self, height: i64) -> Option<i64> {
        let tip = self.tip_height();
        if height < 0 || height > tip {
            return None;
        }
        Some(TEST_GENESIS_TIME + height * BLOCK_SPACING)
    }

    fn utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.state
            .lock()
            .expect("chain lock")
            .utxos
            .get(outpoint)
            .cloned()
    }

    fn headers_at_tip(&self) -> bool {
        self.state.lock().expect("chain lock").headers_at_tip
    }

    fn in_initial_block_download(&self) -> bool {
        self.state.lock().expect("chain lock").ibd
    }
}

#[derive(Default)]
pub struct MockNet {
    pub sent: Mutex<Vec<(PeerId, SnodeMessage)>>,
    pub relayed: Mutex<Vec<Inv>>,
    pub inventories: Mutex<Vec<(PeerId, Inv)>>,
    pub misbehavior: Mutex<Vec<(PeerId, i32)>>,
    peers: Mutex<Vec<PeerInfo>>,
    connected: Mutex<HashMap<SocketAddr, PeerId>>,
    probe_ok: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl MockNet {
    pub fn new() -> Self {
        let net = Self::default();
        net.probe_ok.store(true, Ordering::Relaxed);
        net
    }

    pub fn add_peer(&self, id: PeerId, addr: SocketAddr, version: i32) {
        self.peers.lock().expect("net lock").push(PeerInfo {
            id,
            addr,
            version,
            inbound: false,
            snode_conn: false,
        });
    }

    pub fn mark_connected(&self, addr: SocketAddr, id: PeerId) {
        self.connected.lock().expect("net lock").insert(addr, id);
    }

    pub fn set_local_address(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().expect("net lock") = addr;
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::Relaxed);
    }

    pub fn sent_commands(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .expect("net lock")
            .iter()
            .map(|(_, message)| message.command())
            .collect()
    }

    pub fn total_misbehavior(&self, peer: PeerId) -> i32 {
        self.misbehavior
            .lock()
            .expect("net lock")
            .iter()
            .filter(|(id, _)| *id == peer)
            .map(|(_, score)| *score)
            .sum()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().expect("net lock").clear();
        self.relayed.lock().expect("net lock").clear();
        self.inventories.lock().expect("net lock").clear();
    }
}

impl NetSink for MockNet {
    fn send(&self, peer: PeerId, message: SnodeMessage) {
        self.sent.lock().expect("net lock").push((peer, message));
    }

    fn relay_inv(&self, inv: Inv) {
        self.relayed.lock().expect("net lock").push(inv);
    }

    fn push_inventory(&self, peer: PeerId, inv: Inv) {
        self.inventories.lock().expect("net lock").push((peer, inv));
    }

    fn misbehave(&self, peer: PeerId, score: i32) {
        self.misbehavior
            .lock()
            .expect("net lock")
            .push((peer, score));
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().expect("net lock").clone()
    }

    fn connect(&self, _addr: SocketAddr) {}

    fn is_connected(&self, addr: SocketAddr) -> Option<PeerId> {
        self.connected.lock().expect("net lock").get(&addr).copied()
    }

    fn disconnect(&self, _peer: PeerId) {}

    fn probe(&self, _addr: SocketAddr) -> bool {
        self.probe_ok.load(Ordering::Relaxed)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("net lock")
    }
}

/// A Core instance over the mocks, plus handles to drive them.
pub struct TestBed {
    pub core: Arc<Core>,
    pub chain: Arc<MockChain>,
    pub net: Arc<MockNet>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
}

pub fn bed(network: Network, tip: i64) -> TestBed {
    bed_with_config(
        CoreConfig {
            network,
            ..CoreConfig::default()
        },
        tip,
    )
}

pub fn bed_with_config(config: CoreConfig, tip: i64) -> TestBed {
    bed_with_store(config, tip, Arc::new(MemoryStore::new()))
}

pub fn bed_with_store(config: CoreConfig, tip: i64, store: Arc<MemoryStore>) -> TestBed {
    let chain = Arc::new(MockChain::new(tip));
    let net = Arc::new(MockNet::new());
    let clock = Arc::new(ManualClock::new(TEST_GENESIS_TIME + tip * BLOCK_SPACING));
    let core = Core::new(
        config,
        Arc::clone(&chain) as Arc<dyn ChainView>,
        Arc::clone(&net) as Arc<dyn NetSink>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(NullGovernance),
        Arc::clone(&store) as Arc<dyn aurumd_storage::KeyValueStore>,
        Arc::new(SharedRng::with_seed(42)),
    )
    .expect("core");
    TestBed {
        core,
        chain,
        net,
        clock,
        store,
    }
}

impl TestBed {
    /// Walk the sync controller straight to FINISHED.
    pub fn finish_sync(&self) {
        while !self.core.flags().is_synced() {
            self.core.sync.switch_next();
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}

/// Keys and identity of one simulated snode.
pub struct TestSnode {
    pub collateral: KeyPair,
    pub operator: KeyPair,
    pub outpoint: OutPoint,
    pub addr: SocketAddr,
}

pub fn snode_port(network: Network) -> u16 {
    aurumd_consensus::chain_params(network).default_port
}

pub fn test_snode(seed: u8, network: Network) -> TestSnode {
    let collateral = KeyPair::from_secret_bytes(&[seed; 32]).expect("collateral keys");
    let operator = KeyPair::from_secret_bytes(&[seed.wrapping_add(100); 32]).expect("operator keys");
    let mut hash = [0u8; 32];
    hash[0] = seed;
    hash[1] = 0x77;
    TestSnode {
        collateral,
        operator,
        outpoint: OutPoint { hash, index: 0 },
        addr: SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, seed)),
            snode_port(network),
        ),
    }
}

impl TestSnode {
    /// Fund the collateral UTXO deep enough for registration.
    pub fn fund(&self, bed: &TestBed, height: i64) {
        bed.chain.add_utxo(
            self.outpoint.clone(),
            Utxo {
                value: 1000 * COIN,
                script_pubkey: script_for_key(&self.collateral.public),
                height,
            },
        );
    }

    pub fn signed_ping(&self, bed: &TestBed, sig_time: i64) -> SnodePing {
        let mut ping =
            SnodePing::new(self.outpoint.clone(), bed.chain.as_ref() as &dyn ChainView)
                .expect("ping");
        ping.sign(&self.operator, bed.core.sporks.new_sigs(), sig_time);
        ping
    }

    pub fn signed_broadcast(
        &self,
        bed: &TestBed,
        sig_time: i64,
        ping_time: i64,
    ) -> SnodeBroadcast {
        let ping = self.signed_ping(bed, ping_time);
        let mut mnb = SnodeBroadcast {
            outpoint: self.outpoint.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral.public,
            operator_pubkey: self.operator.public,
            sig: Vec::new(),
            sig_time,
            protocol_version: aurumd_consensus::constants::PROTOCOL_VERSION,
            last_ping: ping,
            recovery: false,
        };
        mnb.sign(&self.collateral, bed.core.sporks.new_sigs(), sig_time);
        mnb
    }

    /// Register through the normal broadcast path.
    pub fn register(&self, bed: &TestBed) {
        let now = bed.now();
        let tip = bed.chain.tip_height();
        self.fund(bed, tip - 200);
        let mnb = self.signed_broadcast(bed, now - 4000, now - 100);
        bed.core
            .registry
            .process_broadcast(None, mnb)
            .expect("broadcast accepted");
    }
}

pub fn hash_at(height: i64) -> Hash256 {
    MockChain::hash_at(height)
}

pub fn default_port_addr(network: Network, host: u8) -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, host)),
        snode_port(network),
    )
}

/// Network used by most tests; mainnet exercises the port rules.
pub fn test_network() -> Network {
    Network::Mainnet
}
