//! Configuration management
//!
//! This module handles loading and managing configuration from:
//! - Command-line arguments
//! - Environment variables
//! - Configuration files (TOML)
//! - Defaults

use crate::client::{Credentials, Role};
use crate::error::{Error, Result};
use crate::ledger::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub genesis: GenesisConfig,

    #[serde(default)]
    pub sale: SaleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Simulated node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Genesis id stamped on every transaction
    #[serde(default = "default_genesis_id")]
    pub genesis_id: String,

    /// Simulated block time; 0 produces blocks as fast as they are requested
    #[serde(default)]
    pub round_interval_ms: u64,

    /// Rounds to wait for a confirmation before giving up
    #[serde(default = "default_wait_rounds")]
    pub wait_rounds: u64,

    /// JSON snapshot continuing one ledger across invocations
    pub ledger_path: Option<PathBuf>,
}

/// Credential table: hex-encoded 32-byte secret keys
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountsConfig {
    pub creator: Option<String>,
    pub seller: Option<String>,
    pub buyer: Option<String>,
}

/// Fresh-ledger allocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Microunits granted to every role account
    #[serde(default = "default_genesis_balance")]
    pub balance: u64,
}

/// Sale and NFT parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleConfig {
    #[serde(default = "default_price")]
    pub price: u64,

    #[serde(default = "default_unit_name")]
    pub unit_name: String,

    #[serde(default = "default_asset_name")]
    pub asset_name: String,

    /// Compile the escrow so `buy` needs a grouped payment to the escrow
    #[serde(default)]
    pub require_grouped_payment: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_genesis_id() -> String {
    "sim-v1".to_string()
}

fn default_wait_rounds() -> u64 {
    10
}

fn default_genesis_balance() -> u64 {
    100_000_000
}

fn default_price() -> u64 {
    1_000_000
}

fn default_unit_name() -> String {
    "CC".to_string()
}

fn default_asset_name() -> String {
    "Carbon Credit: 1 Ton".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            genesis_id: default_genesis_id(),
            round_interval_ms: 0,
            wait_rounds: default_wait_rounds(),
            ledger_path: None,
        }
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            balance: default_genesis_balance(),
        }
    }
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            price: default_price(),
            unit_name: default_unit_name(),
            asset_name: default_asset_name(),
            require_grouped_payment: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file {:?}: {}", path, e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. ./nft-escrow.toml
    /// 2. ~/.nft-escrow/config.toml
    /// 3. /etc/nft-escrow/config.toml
    pub fn load() -> Result<Self> {
        let mut paths = vec![PathBuf::from("nft-escrow.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".nft-escrow").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/nft-escrow/config.toml"));

        for path in paths {
            if path.exists() {
                tracing::info!("Loading config from {:?}", path);
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Secret key for a role from the config file, else its environment variable
    pub fn account_secret(&self, role: Role) -> Option<String> {
        let configured = match role {
            Role::Creator => &self.accounts.creator,
            Role::Seller => &self.accounts.seller,
            Role::Buyer => &self.accounts.buyer,
        };
        configured
            .clone()
            .or_else(|| std::env::var(role.env_var()).ok())
    }

    /// Genesis balances for every role account
    pub fn genesis_allocations(&self) -> Result<Vec<(Address, u64)>> {
        let credentials = Credentials::from_config(self)?;
        Ok(Role::ALL
            .iter()
            .map(|role| (credentials.address(*role), self.genesis.balance))
            .collect())
    }
}
