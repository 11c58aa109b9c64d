//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::adapters::evm::multicall::{MulticallConfig, DEFAULT_MULTICALL3_ADDRESS};
use crate::application::EngineConfig;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network: NetworkSection,
    pub tokens: TokensSection,
    #[serde(default)]
    pub batch: BatchSection,
    pub analysis: AnalysisSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub exclusions: ExclusionsSection,
    pub universe: UniverseSection,
}

/// Network / RPC configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    /// JSON-RPC endpoint (use a private RPC for production)
    pub rpc_url: String,
    /// Network label carried on snapshots and metrics
    pub network: String,
    /// Multicall3 contract address (same on every major EVM chain)
    #[serde(default = "default_multicall_address")]
    pub multicall_address: String,
}

fn default_multicall_address() -> String {
    DEFAULT_MULTICALL3_ADDRESS.to_string()
}

impl NetworkSection {
    /// Get RPC URL with environment variable override
    /// Checks WHALE_RPC_URL env var first, falls back to config value
    pub fn get_rpc_url(&self) -> String {
        std::env::var("WHALE_RPC_URL").unwrap_or_else(|_| self.rpc_url.clone())
    }
}

/// Tracked token contracts
#[derive(Debug, Clone, Deserialize)]
pub struct TokensSection {
    /// Wrapped-native token contract (WETH on mainnet)
    pub wrapped_native: String,
    /// Liquid staking derivative contract (stETH on mainnet)
    pub staked_derivative: String,
    /// Decimals shared by the native asset and both tokens
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u32,
}

fn default_native_decimals() -> u32 {
    18
}

/// Batched RPC configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    /// Addresses per multicall before adaptive splitting kicks in
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Splitting floor; a chunk this small that still fails is marked failed
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    500
}

fn default_min_chunk_size() -> usize {
    50
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

/// Analysis thresholds section
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    /// Size of the tracked top set
    pub top_n: usize,
    /// Comparison window in hours
    pub lookback_hours: i64,
    /// Candidates below this native balance (whole units) never rank
    pub min_whale_balance_native: u64,
    /// Historical snapshot matching tolerance, hours
    #[serde(default = "default_snapshot_tolerance_hours")]
    pub snapshot_tolerance_hours: i64,
    /// Stale-data cutoff: worst snapshot drift as a percent of the window
    #[serde(default = "default_max_drift_pct")]
    pub max_drift_pct: f64,
    /// Minimum snapshot density over the window, percent
    #[serde(default = "default_min_coverage_pct")]
    pub min_coverage_pct: f64,
    /// Minimum fraction of the union with valid current lookups
    #[serde(default = "default_min_signal_fraction")]
    pub min_signal_fraction: f64,
    /// Minimum fraction of the union with any historical record
    #[serde(default = "default_min_history_fraction")]
    pub min_history_fraction: f64,
    /// Accumulator percentage above which the run reads as organic
    #[serde(default = "default_organic_accumulation_pct")]
    pub organic_accumulation_pct: f64,
    /// Gini above which the signal reads as concentrated
    #[serde(default = "default_gini_concentrated")]
    pub gini_concentrated: f64,
    /// Exchange rate below which the derivative reads as depegged
    #[serde(default = "default_depeg_rate")]
    pub depeg_rate: f64,
    /// Net-change tolerance for migration detection, native units
    #[serde(default = "default_migration_tolerance")]
    pub migration_tolerance: f64,
    /// Wrapped + staked holdings above this count as looping, native units
    #[serde(default = "default_looping_balance_threshold")]
    pub looping_balance_threshold: f64,
    /// Fraction of the union above which looping flags the run
    #[serde(default = "default_looping_fraction")]
    pub looping_fraction: f64,
    /// MAD multiplier for the outlier cutoff
    #[serde(default = "default_mad_multiplier")]
    pub mad_multiplier: f64,
}

fn default_snapshot_tolerance_hours() -> i64 {
    2
}

fn default_max_drift_pct() -> f64 {
    25.0
}

fn default_min_coverage_pct() -> f64 {
    85.0
}

fn default_min_signal_fraction() -> f64 {
    0.70
}

fn default_min_history_fraction() -> f64 {
    0.50
}

fn default_organic_accumulation_pct() -> f64 {
    25.0
}

fn default_gini_concentrated() -> f64 {
    0.85
}

fn default_depeg_rate() -> f64 {
    0.98
}

fn default_migration_tolerance() -> f64 {
    0.01
}

fn default_looping_balance_threshold() -> f64 {
    100.0
}

fn default_looping_fraction() -> f64 {
    0.30
}

fn default_mad_multiplier() -> f64 {
    3.0
}

/// Snapshot storage section
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// JSONL snapshot file path (supports ~ expansion)
    pub snapshot_file: String,
}

impl StorageSection {
    pub fn resolved_snapshot_path(&self) -> String {
        shellexpand::tilde(&self.snapshot_file).into_owned()
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

/// Addresses excluded from every whale set (bridges, exchanges, burn)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExclusionsSection {
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Candidate universe the current top set is drawn from
#[derive(Debug, Clone, Deserialize)]
pub struct UniverseSection {
    pub addresses: Vec<String>,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    value.parse::<Address>().map_err(|e| {
        ConfigError::ValidationError(format!("{} is not a valid address ({}): {}", field, value, e))
    })
}

fn decimal_from(field: &str, value: f64) -> Result<Decimal, ConfigError> {
    Decimal::try_from(value).map_err(|e| {
        ConfigError::ValidationError(format!("{} is not representable ({}): {}", field, value, e))
    })
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "rpc_url cannot be empty".to_string(),
            ));
        }
        parse_address("multicall_address", &self.network.multicall_address)?;
        parse_address("wrapped_native", &self.tokens.wrapped_native)?;
        parse_address("staked_derivative", &self.tokens.staked_derivative)?;

        if self.tokens.native_decimals > 28 {
            return Err(ConfigError::ValidationError(format!(
                "native_decimals must be <= 28, got {}",
                self.tokens.native_decimals
            )));
        }

        if self.batch.min_chunk_size == 0 || self.batch.chunk_size < self.batch.min_chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "chunk sizes must satisfy 0 < min_chunk_size <= chunk_size, got {} / {}",
                self.batch.min_chunk_size, self.batch.chunk_size
            )));
        }

        if self.analysis.top_n == 0 {
            return Err(ConfigError::ValidationError(format!(
                "top_n must be > 0, got {}",
                self.analysis.top_n
            )));
        }

        if self.analysis.lookback_hours <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "lookback_hours must be > 0, got {}",
                self.analysis.lookback_hours
            )));
        }

        if self.analysis.snapshot_tolerance_hours <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "snapshot_tolerance_hours must be > 0, got {}",
                self.analysis.snapshot_tolerance_hours
            )));
        }

        for (name, value) in [
            ("max_drift_pct", self.analysis.max_drift_pct),
            ("min_coverage_pct", self.analysis.min_coverage_pct),
            (
                "organic_accumulation_pct",
                self.analysis.organic_accumulation_pct,
            ),
        ] {
            if value <= 0.0 || value > 100.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be 0-100, got {}",
                    name, value
                )));
            }
        }

        for (name, value) in [
            ("min_signal_fraction", self.analysis.min_signal_fraction),
            ("min_history_fraction", self.analysis.min_history_fraction),
            ("looping_fraction", self.analysis.looping_fraction),
            ("gini_concentrated", self.analysis.gini_concentrated),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.analysis.depeg_rate <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "depeg_rate must be > 0, got {}",
                self.analysis.depeg_rate
            )));
        }

        if self.analysis.mad_multiplier <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "mad_multiplier must be > 0, got {}",
                self.analysis.mad_multiplier
            )));
        }

        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging level must be one of {:?}, got {}",
                LOG_LEVELS, self.logging.level
            )));
        }

        if self.storage.snapshot_file.is_empty() {
            return Err(ConfigError::ValidationError(
                "snapshot_file cannot be empty".to_string(),
            ));
        }

        if self.universe.addresses.is_empty() {
            return Err(ConfigError::ValidationError(
                "universe addresses cannot be empty".to_string(),
            ));
        }
        for addr in &self.universe.addresses {
            parse_address("universe address", addr)?;
        }
        for addr in &self.exclusions.addresses {
            parse_address("exclusion address", addr)?;
        }

        Ok(())
    }

    pub fn universe_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.universe
            .addresses
            .iter()
            .map(|a| parse_address("universe address", a))
            .collect()
    }

    pub fn exclusion_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.exclusions
            .addresses
            .iter()
            .map(|a| parse_address("exclusion address", a))
            .collect()
    }

    pub fn multicall_config(&self) -> Result<MulticallConfig, ConfigError> {
        Ok(MulticallConfig {
            multicall_address: parse_address(
                "multicall_address",
                &self.network.multicall_address,
            )?,
            chunk_size: self.batch.chunk_size,
            min_chunk_size: self.batch.min_chunk_size,
            network: self.network.network.clone(),
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let a = &self.analysis;
        Ok(EngineConfig {
            network: self.network.network.clone(),
            top_n: a.top_n,
            lookback_hours: a.lookback_hours,
            min_whale_balance: U256::exp10(self.tokens.native_decimals as usize)
                * U256::from(a.min_whale_balance_native),
            snapshot_tolerance: chrono::Duration::hours(a.snapshot_tolerance_hours),
            max_drift_pct: a.max_drift_pct,
            min_coverage_pct: a.min_coverage_pct,
            min_signal_fraction: decimal_from("min_signal_fraction", a.min_signal_fraction)?,
            min_history_fraction: decimal_from("min_history_fraction", a.min_history_fraction)?,
            organic_accumulation_pct: decimal_from(
                "organic_accumulation_pct",
                a.organic_accumulation_pct,
            )?,
            gini_concentrated: decimal_from("gini_concentrated", a.gini_concentrated)?,
            depeg_rate: decimal_from("depeg_rate", a.depeg_rate)?,
            migration_tolerance: decimal_from("migration_tolerance", a.migration_tolerance)?,
            looping_balance_threshold: decimal_from(
                "looping_balance_threshold",
                a.looping_balance_threshold,
            )?,
            looping_fraction: decimal_from("looping_fraction", a.looping_fraction)?,
            mad_multiplier: decimal_from("mad_multiplier", a.mad_multiplier)?,
            native_decimals: self.tokens.native_decimals,
            wrapped_token: parse_address("wrapped_native", &self.tokens.wrapped_native)?,
            staked_token: parse_address("staked_derivative", &self.tokens.staked_derivative)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[network]
rpc_url = "https://eth.llamarpc.com"
network = "mainnet"

[tokens]
wrapped_native = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
staked_derivative = "0xae7ab96520DE3A18E5e111B5EaAb095312D7fE84"

[batch]
chunk_size = 200
min_chunk_size = 25

[analysis]
top_n = 100
lookback_hours = 24
min_whale_balance_native = 1000

[storage]
snapshot_file = "~/.whalewatch/snapshots.jsonl"

[logging]
level = "info"

[exclusions]
addresses = ["0x00000000219ab540356cBB839Cbe05303d7705Fa"]

[universe]
addresses = [
    "0x1111111111111111111111111111111111111111",
    "0x2222222222222222222222222222222222222222",
]
"#
        .to_string()
    }

    fn load(content: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load_config(file.path())
    }

    #[test]
    fn test_load_valid_config() {
        let config = load(&create_valid_config()).unwrap();

        assert_eq!(config.analysis.top_n, 100);
        assert_eq!(config.analysis.lookback_hours, 24);
        assert_eq!(config.batch.chunk_size, 200);
        assert_eq!(config.network.network, "mainnet");
        // Defaults fill the omitted threshold knobs
        assert_eq!(config.analysis.max_drift_pct, 25.0);
        assert_eq!(config.analysis.min_coverage_pct, 85.0);
        assert_eq!(config.tokens.native_decimals, 18);
        assert_eq!(
            config.network.multicall_address,
            DEFAULT_MULTICALL3_ADDRESS
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_invalid_token_address_rejected() {
        let content = create_valid_config().replace(
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "not-an-address",
        );
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let content = create_valid_config().replace("top_n = 100", "top_n = 0");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_chunk_floor_above_chunk_size_rejected() {
        let content = create_valid_config().replace("min_chunk_size = 25", "min_chunk_size = 400");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_empty_universe_rejected() {
        let mut content = create_valid_config();
        let start = content.find("[universe]").unwrap();
        content.truncate(start);
        content.push_str("[universe]\naddresses = []\n");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_engine_config_conversion() {
        let config = load(&create_valid_config()).unwrap();
        let engine = config.engine_config().unwrap();

        assert_eq!(engine.top_n, 100);
        assert_eq!(engine.lookback_hours, 24);
        assert_eq!(
            engine.min_whale_balance,
            U256::exp10(18) * U256::from(1000u64)
        );
        assert_eq!(engine.snapshot_tolerance, chrono::Duration::hours(2));
        assert_eq!(
            engine.wrapped_token,
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_multicall_config_conversion() {
        let config = load(&create_valid_config()).unwrap();
        let mc = config.multicall_config().unwrap();
        assert_eq!(mc.chunk_size, 200);
        assert_eq!(mc.min_chunk_size, 25);
        assert_eq!(
            mc.multicall_address,
            DEFAULT_MULTICALL3_ADDRESS.parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_log_level_parsed_and_validated() {
        let config = load(&create_valid_config()).unwrap();
        assert_eq!(config.logging.level, "info");

        let content = create_valid_config().replace("level = \"info\"", "level = \"loud\"");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_rpc_url_env_override() {
        let config = load(&create_valid_config()).unwrap();
        // No env var set in tests: config value wins
        std::env::remove_var("WHALE_RPC_URL");
        assert_eq!(config.network.get_rpc_url(), "https://eth.llamarpc.com");
    }

    #[test]
    fn test_address_lists_parse() {
        let config = load(&create_valid_config()).unwrap();
        assert_eq!(config.universe_addresses().unwrap().len(), 2);
        assert_eq!(config.exclusion_addresses().unwrap().len(), 1);
    }
}
