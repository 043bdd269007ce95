//! Local snode activation (C5).
//!
//! Tracks whether this process is a live snode from the network's point
//! of view and emits pings once it is.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use aurumd_consensus::constants::PROTOCOL_VERSION;
use aurumd_consensus::{ChainParams, Network};

use crate::chain::ChainView;
use crate::clock::Clock;
use crate::entry::{ActiveState, SNODE_MIN_PING_SECONDS, SNODE_SENTINEL_PING_MAX_SECONDS};
use crate::messages::SnodePing;
use crate::net::{Inv, NetSink, MSG_SNODE_PING};
use crate::registry::Registry;
use crate::spork::SporkSet;
use crate::sync::SyncFlags;
use crate::LocalSnode;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActivatorState {
    Initial,
    SyncInProcess,
    InputTooNew,
    NotCapable,
    Started,
}

impl ActivatorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::SyncInProcess => "SYNC_IN_PROCESS",
            Self::InputTooNew => "INPUT_TOO_NEW",
            Self::NotCapable => "NOT_CAPABLE",
            Self::Started => "STARTED",
        }
    }
}

struct ActivatorInner {
    state: ActivatorState,
    service: Option<SocketAddr>,
    pinger_enabled: bool,
    not_capable_reason: String,
    sentinel_version: u32,
    sentinel_ping_time: i64,
    /// The external-address probe has succeeded at least once.
    address_probed: bool,
}

pub struct Activator {
    inner: Mutex<ActivatorInner>,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    net: Arc<dyn NetSink>,
    sporks: Arc<SporkSet>,
    params: Arc<ChainParams>,
    sync_flags: Arc<SyncFlags>,
    local: Arc<LocalSnode>,
    external_ip: Option<SocketAddr>,
    listen: bool,
}

impl Activator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        net: Arc<dyn NetSink>,
        sporks: Arc<SporkSet>,
        params: Arc<ChainParams>,
        sync_flags: Arc<SyncFlags>,
        local: Arc<LocalSnode>,
        external_ip: Option<SocketAddr>,
        listen: bool,
    ) -> Self {
        Self {
            inner: Mutex::new(ActivatorInner {
                state: ActivatorState::Initial,
                service: None,
                pinger_enabled: false,
                not_capable_reason: String::new(),
                sentinel_version: 0,
                sentinel_ping_time: 0,
                address_probed: false,
            }),
            chain,
            clock,
            net,
            sporks,
            params,
            sync_flags,
            local,
            external_ip,
            listen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActivatorInner> {
        self.inner.lock().expect("activator lock")
    }

    pub fn state(&self) -> ActivatorState {
        self.lock().state
    }

    pub fn service(&self) -> Option<SocketAddr> {
        self.lock().service
    }

    /// User-visible status line, surfaced over RPC.
    pub fn status_string(&self) -> String {
        let inner = self.lock();
        match inner.state {
            ActivatorState::Initial => "Node just started, not yet activated".to_string(),
            ActivatorState::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start snode".to_string()
            }
            ActivatorState::InputTooNew => format!(
                "Snode collateral must have at least {} confirmations",
                self.params.snode.min_confirmations
            ),
            ActivatorState::NotCapable => {
                format!("Not capable snode: {}", inner.not_capable_reason)
            }
            ActivatorState::Started => "Snode successfully started".to_string(),
        }
    }

    /// The sentinel reports in through this entry point.
    pub fn update_sentinel_ping(&self, version: u32) {
        let mut inner = self.lock();
        inner.sentinel_version = version;
        inner.sentinel_ping_time = self.clock.adjusted_now();
    }

    /// Drive the activation state machine; called on every sync tick and
    /// whenever a broadcast names this node.
    pub fn manage_state(&self, registry: &Registry) {
        if !self.local.snode_mode {
            return;
        }

        if self.params.network != Network::Regtest && !self.sync_flags.is_blockchain_synced() {
            let mut inner = self.lock();
            inner.state = ActivatorState::SyncInProcess;
            aurumd_log::log_info!("activator: {}", inner.state.as_str());
            return;
        }

        {
            let mut inner = self.lock();
            if inner.state == ActivatorState::SyncInProcess {
                inner.state = ActivatorState::Initial;
            }
        }

        if !self.lock().address_probed {
            self.manage_state_initial();
        }
        if self.lock().address_probed {
            self.manage_state_remote(registry);
        }

        self.send_snode_ping(registry);
    }

    /// Figure out and probe our external endpoint.
    fn manage_state_initial(&self) {
        if !self.listen {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason =
                "Snode must accept connections from outside, listening is disabled".to_string();
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }

        // prefer the configured external address, else ask the transport
        // what the outside world sees
        let service = self.external_ip.or_else(|| self.net.local_address());
        let Some(service) = service else {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason =
                "Can't detect a valid external address, will retry when peers are available"
                    .to_string();
            aurumd_log::log_warn!("activator: {}", inner.not_capable_reason);
            return;
        };

        if self.params.network != Network::Regtest && !service.ip().is_ipv4() {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason =
                "External address must be IPv4, use the externalip option".to_string();
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }

        let mainnet_port = aurumd_consensus::chain_params(Network::Mainnet).default_port;
        if self.params.network == Network::Mainnet {
            if service.port() != mainnet_port {
                let mut inner = self.lock();
                inner.state = ActivatorState::NotCapable;
                inner.not_capable_reason = format!(
                    "Invalid port {}, only {} is supported on mainnet",
                    service.port(),
                    mainnet_port
                );
                aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
                return;
            }
        } else if !self.params.allow_multiple_ports && service.port() == mainnet_port {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = format!(
                "Invalid port {}, {} is only supported on mainnet",
                service.port(),
                mainnet_port
            );
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }

        // self-connect probe, done without any component lock held
        aurumd_log::log_info!("activator: checking inbound connection to {}", service);
        let connected = self.net.probe(service);

        let mut inner = self.lock();
        if !connected {
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = format!("Could not connect to {service}");
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }
        inner.service = Some(service);
        inner.address_probed = true;
    }

    /// Match our keys against the registry and flip to STARTED.
    fn manage_state_remote(&self, registry: &Registry) {
        let Some(operator_key) = self.local.operator_pubkey() else {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = "No snode operator key configured".to_string();
            return;
        };

        registry.check_snode_by_operator(&operator_key);

        let Some(info) = registry.info_by_operator_key(&operator_key) else {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = "Snode not in snode list".to_string();
            aurumd_log::log_warn!("activator: {}", inner.not_capable_reason);
            return;
        };

        let mut inner = self.lock();
        if info.protocol_version != PROTOCOL_VERSION {
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = "Invalid protocol version".to_string();
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }
        if inner.service != Some(info.addr) {
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason =
                "Broadcasted address does not match our external address".to_string();
            aurumd_log::log_error!("activator: {}", inner.not_capable_reason);
            return;
        }
        if !matches!(
            info.active_state,
            ActiveState::Enabled | ActiveState::PreEnabled
        ) {
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason =
                format!("Snode in {} state", info.active_state.as_str());
            aurumd_log::log_warn!("activator: {}", inner.not_capable_reason);
            return;
        }
        if inner.state != ActivatorState::Started {
            aurumd_log::log_info!("activator: STARTED");
            inner.state = ActivatorState::Started;
            inner.pinger_enabled = true;
            self.local.set_active_outpoint(Some(info.outpoint));
        }
    }

    /// Mint, sign, install, and relay a fresh ping.
    pub fn send_snode_ping(&self, registry: &Registry) -> bool {
        let (pinger_enabled, sentinel_version, sentinel_ping_time) = {
            let inner = self.lock();
            (
                inner.pinger_enabled,
                inner.sentinel_version,
                inner.sentinel_ping_time,
            )
        };
        if !pinger_enabled {
            return false;
        }
        let Some(keys) = self.local.keys() else {
            return false;
        };
        let Some(outpoint) = self.local.active_outpoint() else {
            return false;
        };

        if !registry.has(&outpoint) {
            let mut inner = self.lock();
            inner.state = ActivatorState::NotCapable;
            inner.not_capable_reason = "Snode not in snode list".to_string();
            aurumd_log::log_warn!("activator: {}", inner.not_capable_reason);
            return false;
        }

        let Some(mut ping) = SnodePing::new(outpoint.clone(), self.chain.as_ref()) else {
            return false;
        };
        let adjusted_now = self.clock.adjusted_now();
        ping.sentinel_version = sentinel_version;
        ping.sentinel_is_current =
            (adjusted_now - sentinel_ping_time).abs() < SNODE_SENTINEL_PING_MAX_SECONDS;
        ping.sign(&keys, self.sporks.new_sigs(), adjusted_now);

        if registry.is_snode_pinged_within(&outpoint, SNODE_MIN_PING_SECONDS, ping.sig_time) {
            aurumd_log::log_debug!("activator: too early to send another ping");
            return false;
        }

        registry.set_snode_last_ping(&outpoint, &ping);
        aurumd_log::log_info!(
            "activator: relaying ping, collateral={}",
            outpoint.to_string_short()
        );
        self.net.relay_inv(Inv {
            kind: MSG_SNODE_PING,
            hash: ping.hash(self.sporks.new_sigs()),
        });
        true
    }
}
