//! Configuration recognized by the coordination layer.

use std::net::SocketAddr;

use aurumd_consensus::{chain_params, ChainParams, Network};

use crate::signing::KeyPair;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub network: Network,
    /// Run this process as a service node.
    pub snode_mode: bool,
    /// Operator key in WIF; required in snode mode.
    pub operator_wif: Option<String>,
    /// Externally visible endpoint, preferred over peer discovery.
    pub external_ip: Option<SocketAddr>,
    /// Disables the whole subsystem.
    pub lite_mode: bool,
    pub listen: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            snode_mode: false,
            operator_wif: None,
            external_ip: None,
            lite_mode: false,
            listen: true,
        }
    }
}

impl CoreConfig {
    /// Parse `--key[=value]` style arguments the daemon passes through.
    pub fn parse_args<I, S>(raw_args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for raw in raw_args {
            let arg = raw.as_ref();
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (arg, None),
            };
            match key {
                "--testnet" => config.network = Network::Testnet,
                "--regtest" => config.network = Network::Regtest,
                "--snode" => config.snode_mode = true,
                "--snodeprivkey" => {
                    let value = value.ok_or("--snodeprivkey requires a value")?;
                    config.operator_wif = Some(value.to_string());
                }
                "--externalip" => {
                    let value = value.ok_or("--externalip requires a value")?;
                    let addr: SocketAddr = value
                        .parse()
                        .map_err(|_| format!("invalid --externalip value: {value}"))?;
                    config.external_ip = Some(addr);
                }
                "--litemode" => config.lite_mode = true,
                "--nolisten" => config.listen = false,
                _ => return Err(format!("unknown argument: {arg}")),
            }
        }

        if config.snode_mode && config.lite_mode {
            return Err("snode mode is incompatible with lite mode".to_string());
        }
        if config.snode_mode && config.operator_wif.is_none() {
            return Err("snode mode requires --snodeprivkey".to_string());
        }
        Ok(config)
    }

    pub fn params(&self) -> ChainParams {
        chain_params(self.network)
    }

    /// Resolve the configured operator key, if any.
    pub fn operator_keys(&self, params: &ChainParams) -> Result<Option<KeyPair>, String> {
        match &self.operator_wif {
            None => Ok(None),
            Some(wif) => KeyPair::from_wif(wif, params)
                .map(Some)
                .map_err(|err| format!("snodeprivkey: {err}")),
        }
    }
}
