use alloy_primitives::Address;
use config::{Environment, File, FileFormat, Map};
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::incentivizer::price::BINANCE_API_URL;
use crate::proof::RetrievalMode;
use crate::types::BridgeAssetKind;

const MAINNET_PRESET: &str = include_str!("../config/mainnet.json");
const GOERLI_PRESET: &str = include_str!("../config/goerli.json");

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Preset name or path the configuration was loaded from
    pub network: String,
    pub source: SourceConfig,
    pub near: NearConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub incentivization: Option<IncentivizationSettings>,
}

/// Ethereum side
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    /// Usually supplied through SOURCE_RPC_URL
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub retrieve_receipts_mode: RetrievalMode,
    #[serde(default)]
    pub receipts_cache_dir: Option<PathBuf>,
    /// When set, every generated proof is also written here
    #[serde(default)]
    pub proofs_dir: Option<PathBuf>,
}

/// Custom Debug that redacts the RPC URL (commonly embeds an API key).
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("rpc_url", &"<redacted>")
            .field("retrieve_receipts_mode", &self.retrieve_receipts_mode)
            .field("receipts_cache_dir", &self.receipts_cache_dir)
            .field("proofs_dir", &self.proofs_dir)
            .finish()
    }
}

/// NEAR side
#[derive(Debug, Clone, Deserialize)]
pub struct NearConfig {
    pub json_rpc: String,
    pub relayer_account: String,
    pub eth_on_near_client_account: String,
    /// Routing target that marks aurora-bound recipients
    pub aurora_account: String,
    /// Key file of the relayer account, usually supplied through NEAR_KEY_PATH
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    #[serde(default = "default_required_confirmations")]
    pub num_required_client_confirmations: u64,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub relay_only_aurora_events: bool,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            num_required_client_confirmations: default_required_confirmations(),
            polling_interval_ms: default_polling_interval(),
            relay_only_aurora_events: false,
            api_port: default_api_port(),
        }
    }
}

/// One bridge connector: where its events are emitted and where they go
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    pub kind: BridgeAssetKind,
    pub eth_address: String,
    pub near_account: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ConnectorConfig {
    pub fn address(&self) -> Result<Address> {
        self.eth_address
            .parse()
            .wrap_err_with(|| format!("Invalid {} address {:?}", self.kind, self.eth_address))
    }
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncentivizationSettings {
    pub rules_path: PathBuf,
    #[serde(default = "default_price_api_url")]
    pub price_api_url: String,
}

/// Default functions
fn default_required_confirmations() -> u64 {
    10
}

fn default_polling_interval() -> u64 {
    60_000
}

fn default_api_port() -> u16 {
    9090
}

fn default_enabled() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite://relayer.db".to_string()
}

fn default_price_api_url() -> String {
    BINANCE_API_URL.to_string()
}

fn preset(network: &str) -> Option<&'static str> {
    match network {
        "mainnet" => Some(MAINNET_PRESET),
        "goerli" => Some(GOERLI_PRESET),
        _ => None,
    }
}

impl Config {
    /// Load the configuration for a preset name or a JSON file path
    /// Loads .env file if present, then applies environment overrides
    pub fn load(network: &str) -> Result<Self> {
        if Path::new(".env").exists() {
            dotenvy::from_filename(".env").wrap_err("Failed to load .env file")?;
        }
        Self::load_with_env(network, env::vars().collect())
    }

    /// Load with an explicit set of environment variables
    ///
    /// `RELAYER__<SECTION>__<KEY>` overrides any file value; `SOURCE_RPC_URL`,
    /// `NEAR_KEY_PATH` and `DATABASE_URL` take precedence over everything.
    pub fn load_with_env(network: &str, vars: Map<String, String>) -> Result<Self> {
        let builder = config::Config::builder();
        let builder = match preset(network) {
            Some(json) => builder.add_source(File::from_str(json, FileFormat::Json)),
            None => builder.add_source(File::new(network, FileFormat::Json)),
        };

        let mut config: Config = builder
            .add_source(
                Environment::with_prefix("RELAYER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars.clone())),
            )
            .set_override("network", network)
            .wrap_err("Invalid network override")?
            .build()
            .wrap_err_with(|| format!("Failed to load configuration {}", network))?
            .try_deserialize()
            .wrap_err_with(|| format!("Invalid configuration {}", network))?;

        if let Some(url) = vars.get("SOURCE_RPC_URL") {
            config.source.rpc_url = url.clone();
        }
        if let Some(path) = vars.get("NEAR_KEY_PATH") {
            config.near.key_path = Some(PathBuf::from(path));
        }
        if let Some(url) = vars.get("DATABASE_URL") {
            config.database.url = url.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relayer.polling_interval_ms)
    }

    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connectors.iter().filter(|c| c.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.rpc_url.is_empty() {
            return Err(eyre!("source.rpc_url cannot be empty (set SOURCE_RPC_URL)"));
        }

        if self.near.json_rpc.is_empty() {
            return Err(eyre!("near.json_rpc cannot be empty"));
        }

        if self.near.relayer_account.is_empty() {
            return Err(eyre!("near.relayer_account cannot be empty"));
        }

        if self.near.eth_on_near_client_account.is_empty() {
            return Err(eyre!("near.eth_on_near_client_account cannot be empty"));
        }

        if self.relayer.polling_interval_ms == 0 {
            return Err(eyre!("relayer.polling_interval_ms must be positive"));
        }

        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        let mut kinds = HashSet::new();
        for connector in self.enabled_connectors() {
            connector.address()?;
            if connector.near_account.is_empty() {
                return Err(eyre!("{} connector needs a near_account", connector.kind));
            }
            if !kinds.insert(connector.kind) {
                return Err(eyre!("{} connector is enabled more than once", connector.kind));
            }
        }
        if kinds.is_empty() {
            return Err(eyre!("at least one connector must be enabled"));
        }

        Ok(())
    }
}
