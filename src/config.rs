//! Configuration for the gate server.
//!
//! Values come from a JSON config file selected with `--config` (default
//! `config.json`); fields missing from the file fall back to environment
//! variables, then to hardcoded defaults. A missing default config file is
//! fine; everything can be supplied through the environment.

use alloy_primitives::Address;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::money::MoneyAmount;
use crate::registry::{ChainConfig, ChainRegistry, NetworkMode, RegistryError};

/// CLI arguments for the gate server.
#[derive(Parser, Debug)]
#[command(name = "x402-gate")]
#[command(about = "Payment gate for priced HTTP APIs over x402")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables, then
/// to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default = "config_defaults::default_network_mode")]
    network_mode: NetworkMode,
    /// The wallet every payment must be sent to.
    #[serde(default = "config_defaults::default_receiving_wallet")]
    receiving_wallet: Option<Address>,
    /// Price per admitted call, in USDC.
    #[serde(default = "config_defaults::default_price")]
    price: MoneyAmount,
    /// Requests per wallet per 60-second window.
    #[serde(default = "config_defaults::default_rate_limit")]
    rate_limit: u32,
    /// Directory of the sled database holding claims and budgets.
    #[serde(default = "config_defaults::default_db_path")]
    db_path: PathBuf,
    /// Explicit chain list; when empty the built-in registry for the
    /// network mode is used.
    #[serde(default)]
    chains: Vec<ChainConfig>,
    /// Default chain key; when unset the network mode decides.
    #[serde(default)]
    default_chain: Option<String>,
}

pub mod config_defaults {
    use super::*;
    use std::env;
    use std::str::FromStr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PRICE: &str = "0.01";
    pub const DEFAULT_RATE_LIMIT: u32 = 10;
    pub const DEFAULT_DB_PATH: &str = "gate-db";

    /// $PORT -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// $HOST -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().expect("valid address")))
    }

    /// $NETWORK_MODE -> test
    pub fn default_network_mode() -> NetworkMode {
        env::var("NETWORK_MODE")
            .ok()
            .and_then(|s| NetworkMode::from_str(&s).ok())
            .unwrap_or(NetworkMode::Test)
    }

    /// $RECEIVING_WALLET -> none (startup fails without one)
    pub fn default_receiving_wallet() -> Option<Address> {
        env::var("RECEIVING_WALLET")
            .ok()
            .and_then(|s| s.parse().ok())
    }

    /// $PRICE_USDC -> "0.01"
    pub fn default_price() -> MoneyAmount {
        env::var("PRICE_USDC")
            .ok()
            .and_then(|s| MoneyAmount::parse(&s).ok())
            .unwrap_or_else(|| MoneyAmount::parse(DEFAULT_PRICE).expect("valid default price"))
    }

    /// $RATE_LIMIT -> 10 per minute
    pub fn default_rate_limit() -> u32 {
        env::var("RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT)
    }

    /// $GATE_DB_PATH -> "gate-db"
    pub fn default_db_path() -> PathBuf {
        env::var("GATE_DB_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            network_mode: config_defaults::default_network_mode(),
            receiving_wallet: config_defaults::default_receiving_wallet(),
            price: config_defaults::default_price(),
            rate_limit: config_defaults::default_rate_limit(),
            db_path: config_defaults::default_db_path(),
            chains: Vec::new(),
            default_chain: None,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("No receiving wallet configured; set RECEIVING_WALLET or the receiving_wallet field")]
    MissingReceivingWallet,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    pub fn receiving_wallet(&self) -> Result<Address, ConfigError> {
        self.receiving_wallet
            .ok_or(ConfigError::MissingReceivingWallet)
    }

    pub fn price(&self) -> &MoneyAmount {
        &self.price
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Build the chain registry: the configured chain list, or the built-in
    /// registry for the network mode when none is listed.
    pub fn registry(&self) -> Result<ChainRegistry, ConfigError> {
        if self.chains.is_empty() {
            return Ok(ChainRegistry::known(self.network_mode));
        }
        let default_key = match &self.default_chain {
            Some(key) => key.clone(),
            None => {
                let preferred = self.network_mode.default_chain_key();
                if self.chains.iter().any(|c| c.key == preferred) {
                    preferred.to_string()
                } else {
                    self.chains[0].key.clone()
                }
            }
        };
        Ok(ChainRegistry::new(self.chains.clone(), &default_key)?)
    }

    /// Load configuration from CLI arguments and the JSON file.
    ///
    /// A missing file at the default path is not an error; the environment
    /// supplies everything. An explicitly given path must exist.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_from_path(cli_args.config)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            if path == PathBuf::from("config.json") {
                tracing::info!("no config.json found, using environment defaults");
                return Ok(Config::default());
            }
            return Err(ConfigError::FileRead(
                path.clone(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            ));
        }
        let content =
            fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "port": 9000,
            "host": "127.0.0.1",
            "network_mode": "prod",
            "receiving_wallet": "0x1111111111111111111111111111111111111111",
            "price": "0.05",
            "rate_limit": 30,
            "db_path": "/var/lib/gate",
            "chains": [{
                "key": "base",
                "rpc_url": "https://mainnet.base.org",
                "token_contract": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                "chain_id": 8453,
                "explorer_url": "https://basescan.org",
                "label": "Base"
            }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.network_mode(), NetworkMode::Prod);
        assert_eq!(config.rate_limit(), 30);
        assert!(config.receiving_wallet().is_ok());
        assert_eq!(config.price().to_string(), "0.05");

        let registry = config.registry().unwrap();
        assert_eq!(registry.default_key(), "base");
        // The omitted gas note picks up its default.
        assert_eq!(registry.resolve("base").gas_note, "low");
    }

    #[test]
    fn empty_chain_list_uses_known_registry() {
        let config: Config = serde_json::from_str(r#"{"network_mode": "prod"}"#).unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.default_key(), "base");
    }

    #[test]
    fn explicit_default_chain_wins() {
        let json = r#"{
            "network_mode": "prod",
            "default_chain": "base-sepolia",
            "chains": [{
                "key": "base-sepolia",
                "rpc_url": "https://sepolia.base.org",
                "token_contract": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                "chain_id": 84532,
                "explorer_url": "https://sepolia.basescan.org",
                "label": "Base Sepolia"
            }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.default_key(), "base-sepolia");
    }

    #[test]
    fn missing_receiving_wallet_is_an_error() {
        let config: Config = serde_json::from_str("{}").unwrap();
        if config.receiving_wallet.is_none() {
            assert!(matches!(
                config.receiving_wallet(),
                Err(ConfigError::MissingReceivingWallet)
            ));
        }
    }
}
