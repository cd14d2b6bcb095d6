//! Configuration & Bootstrap: CLI flags layered over a config file and
//! environment variables, resolved once into an immutable [`Config`] record.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use stratumd_crypto::{decode_address, Network as AddressNetwork};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid listen address {0:?}: {1}")]
    InvalidListenAddr(String, std::net::AddrParseError),

    #[error("invalid payout address: {0}")]
    InvalidPayoutAddress(#[from] stratumd_crypto::AddressError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl From<Network> for AddressNetwork {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => AddressNetwork::Mainnet,
            Network::Testnet => AddressNetwork::Testnet,
            Network::Regtest => AddressNetwork::Regtest,
        }
    }
}

/// Raw settings as they come off the CLI/file/env layers, before the payout
/// address has been decoded into a scriptPubKey.
#[derive(Debug, Clone, Deserialize, Parser)]
#[command(name = "stratumd", about = "Stratum v1 proxy bridging ASIC miners to a Bitcoin Core node")]
pub struct RawConfig {
    /// Address the Stratum listener binds to.
    #[arg(long, env = "STRATUMD_LISTEN_ADDR", default_value = "0.0.0.0:3333")]
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Bitcoin Core JSON-RPC endpoint, e.g. http://127.0.0.1:8332/.
    #[arg(long, env = "STRATUMD_NODE_RPC_URL")]
    #[serde(default)]
    pub node_rpc_url: String,

    #[arg(long, env = "STRATUMD_NODE_RPC_USER")]
    #[serde(default)]
    pub node_rpc_user: String,

    #[arg(long, env = "STRATUMD_NODE_RPC_PASS")]
    #[serde(default)]
    pub node_rpc_pass: String,

    /// Address coinbase rewards are paid to.
    #[arg(long, env = "STRATUMD_PAYOUT_ADDRESS")]
    #[serde(default)]
    pub payout_address: String,

    /// Bytes appended to the coinbase scriptSig, e.g. "/stratumd/".
    #[arg(long, env = "STRATUMD_COINBASE_TAG", default_value = "/stratumd/")]
    #[serde(default = "default_coinbase_tag")]
    pub coinbase_tag: String,

    #[arg(long, env = "STRATUMD_NETWORK", value_enum, default_value = "mainnet")]
    #[serde(default = "default_network")]
    pub network: Network,

    /// Seconds between `getblocktemplate` polls.
    #[arg(long, env = "STRATUMD_POLL_INTERVAL_SECS", default_value_t = 30)]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Node RPC call timeout, in seconds.
    #[arg(long, env = "STRATUMD_NODE_TIMEOUT_SECS", default_value_t = 10)]
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Floor below which `mining.suggest_difficulty` cannot lower a session.
    #[arg(long, env = "STRATUMD_SHARE_DIFFICULTY_FLOOR", default_value_t = 1.0)]
    #[serde(default = "default_share_difficulty_floor")]
    pub share_difficulty_floor: f64,

    /// Miner socket idle timeout, in seconds.
    #[arg(long, env = "STRATUMD_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Seconds a connection has to reach `ACTIVE` before being closed.
    #[arg(long, env = "STRATUMD_HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[arg(long, env = "STRATUMD_LOG_LEVEL", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional TOML/YAML/JSON config file, layered beneath env vars and CLI flags.
    #[arg(long, env = "STRATUMD_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3333".to_string()
}
fn default_coinbase_tag() -> String {
    "/stratumd/".to_string()
}
fn default_network() -> Network {
    Network::Mainnet
}
fn default_poll_interval() -> u64 {
    30
}
fn default_node_timeout() -> u64 {
    10
}
fn default_share_difficulty_floor() -> f64 {
    1.0
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The fully resolved, immutable configuration every component is
/// constructed from.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub node_rpc_url: String,
    pub node_rpc_user: String,
    pub node_rpc_pass: String,
    pub payout_script: Vec<u8>,
    pub coinbase_tag: Vec<u8>,
    pub network: Network,
    pub poll_interval: Duration,
    pub node_timeout: Duration,
    pub share_difficulty_floor: f64,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Resolves layered configuration: built-in defaults < config file <
    /// environment variables < CLI flags (highest precedence).
    pub fn load() -> Result<Self, ConfigError> {
        let cli = RawConfig::parse();

        let mut builder = config::Config::builder()
            .set_default("listen_addr", default_listen_addr())?
            .set_default("coinbase_tag", default_coinbase_tag())?
            .set_default("network", "mainnet")?
            .set_default("poll_interval_secs", default_poll_interval() as i64)?
            .set_default("node_timeout_secs", default_node_timeout() as i64)?
            .set_default("share_difficulty_floor", default_share_difficulty_floor())?
            .set_default("idle_timeout_secs", default_idle_timeout() as i64)?
            .set_default("handshake_timeout_secs", default_handshake_timeout() as i64)?
            .set_default("log_level", default_log_level())?;

        if let Some(path) = &cli.config_file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("STRATUMD"));

        let layered = builder.build()?;
        let mut raw: RawConfig = layered.try_deserialize()?;

        // CLI flags win over file/env for anything actually passed on the
        // command line; clap's own env/default_value already folded
        // STRATUMD_* env vars and built-ins into `cli`, so anything the file
        // source didn't already override takes the CLI value as-is.
        raw.node_rpc_url = cli.node_rpc_url;
        raw.node_rpc_user = cli.node_rpc_user;
        raw.node_rpc_pass = cli.node_rpc_pass;
        raw.payout_address = cli.payout_address;

        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self, ConfigError> {
        let listen_addr = raw
            .listen_addr
            .parse()
            .map_err(|e| ConfigError::InvalidListenAddr(raw.listen_addr.clone(), e))?;
        let payout_script = decode_address(&raw.payout_address, raw.network.into())?;

        Ok(Config {
            listen_addr,
            node_rpc_url: raw.node_rpc_url,
            node_rpc_user: raw.node_rpc_user,
            node_rpc_pass: raw.node_rpc_pass,
            payout_script,
            coinbase_tag: raw.coinbase_tag.into_bytes(),
            network: raw.network,
            poll_interval: Duration::from_secs(raw.poll_interval_secs),
            node_timeout: Duration::from_secs(raw.node_timeout_secs),
            share_difficulty_floor: raw.share_difficulty_floor,
            idle_timeout: Duration::from_secs(raw.idle_timeout_secs),
            handshake_timeout: Duration::from_secs(raw.handshake_timeout_secs),
            log_level: raw.log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawConfig {
        RawConfig {
            listen_addr: "127.0.0.1:3333".to_string(),
            node_rpc_url: "http://127.0.0.1:8332/".to_string(),
            node_rpc_user: "user".to_string(),
            node_rpc_pass: "pass".to_string(),
            payout_address: "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string(),
            coinbase_tag: "/stratumd/".to_string(),
            network: Network::Mainnet,
            poll_interval_secs: 30,
            node_timeout_secs: 10,
            share_difficulty_floor: 1.0,
            idle_timeout_secs: 600,
            handshake_timeout_secs: 30,
            log_level: "info".to_string(),
            config_file: None,
        }
    }

    #[test]
    fn resolves_a_well_formed_raw_config() {
        let config = Config::resolve(sample_raw()).expect("resolves");
        assert_eq!(config.listen_addr.port(), 3333);
        assert!(!config.payout_script.is_empty());
    }

    #[test]
    fn rejects_an_invalid_payout_address() {
        let mut raw = sample_raw();
        raw.payout_address = "not-an-address".to_string();
        assert!(Config::resolve(raw).is_err());
    }

    #[test]
    fn rejects_an_unparseable_listen_addr() {
        let mut raw = sample_raw();
        raw.listen_addr = "not-an-addr".to_string();
        assert!(Config::resolve(raw).is_err());
    }
}
