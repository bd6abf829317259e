//! # Engine Configuration - Dynamic Parameter Management
//!
//! ## Purpose
//!
//! Runtime parameter control for every engine component without hardcoded
//! values: discovery cadence and fan-out, validator thresholds, execution
//! gates and relay settings, flash loan preferences, and tracker polling.
//! Supports JSON file loading, `ARB_*` environment variable overrides, and
//! full validation with detailed error reporting before any component starts.
//!
//! ## Integration Points
//!
//! - **Input Sources**: JSON configuration files, environment variables
//! - **Output Destinations**: every engine component takes its config group
//!   by value at construction
//! - **Validation**: `validate()` runs at startup; failures are fatal
//!   configuration errors
//! - **Serialization**: JSON round-trip for persistence and sharing

use ethers::types::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub validation: ValidationConfig,
    pub execution: ExecutionConfig,
    pub flash_loan: FlashLoanConfig,
    pub tracker: TrackerConfig,
    pub market_data: MarketDataConfig,
    pub chain: ChainConfig,
}

/// Opportunity discovery parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between discovery loop iterations.
    pub discovery_interval_seconds: u64,
    /// Bound on the merged result list per run.
    pub max_opportunities: usize,
    /// Minimum profit after gas, in wei, for a returned opportunity.
    pub min_profit_wei: u128,
    pub parallel_detection: bool,
    pub max_concurrent_detectors: usize,
    /// Pool pairs evaluated per detector batch.
    pub batch_size: usize,
    /// Longest route a detector may emit.
    pub max_path_length: usize,
    /// Wall-clock budget for one discovery run, in seconds.
    pub run_timeout_seconds: u64,
    /// TTL for pair-list and graph caches, in seconds.
    pub pair_cache_ttl_seconds: u64,
    /// TTL for quote caches, in seconds.
    pub quote_cache_ttl_seconds: u64,
    /// TTL for pool snapshot caches, in seconds.
    pub pool_cache_ttl_seconds: u64,
    /// Base tokens considered when the caller supplies none.
    pub base_token_count: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_interval_seconds: 10,
            max_opportunities: 100,
            min_profit_wei: 0,
            parallel_detection: true,
            max_concurrent_detectors: 5,
            batch_size: 10,
            max_path_length: 4,
            run_timeout_seconds: 30,
            pair_cache_ttl_seconds: 5,
            quote_cache_ttl_seconds: 5,
            pool_cache_ttl_seconds: 30,
            base_token_count: 5,
        }
    }
}

/// Validator chain thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum estimated slippage as a ratio (0.005 = 0.5%).
    pub max_slippage: Decimal,
    pub min_liquidity_usd: Decimal,
    /// Maximum price impact as a ratio (0.01 = 1%).
    pub max_price_impact: Decimal,
    /// Gas cost bound as a percentage of expected profit.
    pub max_gas_percentage: Decimal,
    /// Buffer applied to the quoted gas price before the gas check (0.2 = +20%).
    pub gas_price_buffer: Decimal,
    pub price_verification_sources: usize,
    pub max_price_age_seconds: u64,
    pub enable_simulation: bool,
    pub min_confidence_threshold: Decimal,
    /// Per-opportunity budget for the whole chain, in seconds.
    pub validation_timeout_seconds: u64,
    /// Token addresses rejected outright.
    pub token_blacklist: Vec<Address>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_slippage: dec!(0.005),
            min_liquidity_usd: dec!(10000),
            max_price_impact: dec!(0.01),
            max_gas_percentage: dec!(50),
            gas_price_buffer: dec!(0.2),
            price_verification_sources: 1,
            max_price_age_seconds: 15,
            enable_simulation: true,
            min_confidence_threshold: dec!(0.5),
            validation_timeout_seconds: 10,
            token_blacklist: Vec::new(),
        }
    }
}

/// Execution gates and submission behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub default_execution_strategy: String,
    pub auto_execute: bool,
    pub max_concurrent_executions: usize,
    pub min_time_between_executions_seconds: u64,
    pub execution_timeout_seconds: u64,
    pub enable_flashbots: bool,
    pub min_confidence_score: Decimal,
    pub wait_for_receipt: bool,
    /// Added to estimated gas limits (0.2 = +20%).
    pub gas_limit_buffer: Decimal,
    /// Bundle target offset from the current block, in [1, 8].
    pub blocks_into_future: u64,
    /// Blocks to wait for bundle inclusion before timing out.
    pub max_wait_blocks: u64,
    /// Step deadline offset, in seconds (20 minutes).
    pub swap_deadline_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_execution_strategy: "standard".to_string(),
            auto_execute: false,
            max_concurrent_executions: 1,
            min_time_between_executions_seconds: 0,
            execution_timeout_seconds: 300,
            enable_flashbots: false,
            min_confidence_score: dec!(0.7),
            wait_for_receipt: false,
            gas_limit_buffer: dec!(0.2),
            blocks_into_future: 2,
            max_wait_blocks: 5,
            swap_deadline_seconds: 1200,
        }
    }
}

/// Flash loan sourcing preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanConfig {
    /// Slippage tolerance inside the loan callback, as a ratio.
    pub slippage_tolerance: Decimal,
    /// Required profit as a multiple of total loan cost.
    pub profit_threshold_multiplier: Decimal,
    /// Gas estimate multiplier for loan transactions.
    pub gas_buffer: Decimal,
    /// Provider names in preference order.
    pub preferred_providers: Vec<String>,
    /// Zero-fee vault entry contract.
    pub vault_address: Address,
    /// Fee-bearing lending pool entry contract.
    pub lending_pool_address: Address,
    /// Tokens the configured providers may lend.
    pub supported_tokens: Vec<Address>,
}

impl Default for FlashLoanConfig {
    fn default() -> Self {
        Self {
            slippage_tolerance: dec!(0.005),
            profit_threshold_multiplier: dec!(1.5),
            gas_buffer: dec!(1.2),
            preferred_providers: vec!["zero-fee".to_string(), "lending-pool".to_string()],
            vault_address: Address::zero(),
            lending_pool_address: Address::zero(),
            supported_tokens: Vec::new(),
        }
    }
}

/// Receipt polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub poll_interval_seconds: u64,
    pub max_attempts: u32,
    pub confirmation_blocks: u64,
    pub max_wait_blocks: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 2,
            max_attempts: 30,
            confirmation_blocks: 1,
            max_wait_blocks: 5,
        }
    }
}

/// Market data refresh behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub refresh_interval_seconds: u64,
    /// TTL for the USD price cache, in seconds.
    pub price_cache_ttl_seconds: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 5,
            price_cache_ttl_seconds: 5,
        }
    }
}

/// Chain and relay endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub flashbots_relay_url: String,
    /// Trading wallet key, hex; empty means read from environment only.
    pub wallet_key: String,
    /// Dedicated relay authentication key, distinct from the trading key.
    pub flashbots_auth_key: String,
    pub rpc_timeout_seconds: u64,
    /// Router contract per venue id; venues without an entry are called at
    /// the pool address directly.
    pub routers: std::collections::BTreeMap<String, Address>,
    /// Optional JSON snapshot of pool state to seed discovery with.
    pub pools_file: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            flashbots_relay_url: "https://relay.flashbots.net".to_string(),
            wallet_key: String::new(),
            flashbots_auth_key: String::new(),
            rpc_timeout_seconds: 30,
            routers: std::collections::BTreeMap::new(),
            pools_file: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Defaults overridden by environment variables where present.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ARB_MIN_PROFIT_WEI") {
            if let Ok(value) = v.parse::<u128>() {
                config.discovery.min_profit_wei = value;
            }
        }
        if let Ok(v) = std::env::var("ARB_DISCOVERY_INTERVAL_SECONDS") {
            if let Ok(value) = v.parse::<u64>() {
                config.discovery.discovery_interval_seconds = value;
            }
        }
        if let Ok(v) = std::env::var("ARB_MAX_CONCURRENT_DETECTORS") {
            if let Ok(value) = v.parse::<usize>() {
                config.discovery.max_concurrent_detectors = value;
            }
        }
        if let Ok(v) = std::env::var("ARB_MAX_SLIPPAGE") {
            if let Ok(value) = v.parse::<Decimal>() {
                config.validation.max_slippage = value;
            }
        }
        if let Ok(v) = std::env::var("ARB_ENABLE_SIMULATION") {
            config.validation.enable_simulation = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ARB_AUTO_EXECUTE") {
            config.execution.auto_execute = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ARB_ENABLE_FLASHBOTS") {
            config.execution.enable_flashbots = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ARB_RPC_URL") {
            config.chain.rpc_url = v;
        }
        if let Ok(v) = std::env::var("ARB_CHAIN_ID") {
            if let Ok(value) = v.parse::<u64>() {
                config.chain.chain_id = value;
            }
        }
        if let Ok(v) = std::env::var("ARB_FLASHBOTS_RELAY_URL") {
            config.chain.flashbots_relay_url = v;
        }
        if let Ok(v) = std::env::var("ARB_WALLET_KEY") {
            config.chain.wallet_key = v;
        }
        if let Ok(v) = std::env::var("ARB_FLASHBOTS_AUTH_KEY") {
            config.chain.flashbots_auth_key = v;
        }

        config
    }

    /// Save configuration to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate all parameter groups; any failure is fatal at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.discovery.max_concurrent_detectors == 0 {
            anyhow::bail!("max_concurrent_detectors must be positive");
        }
        if self.discovery.max_path_length < 2 {
            anyhow::bail!("max_path_length must be at least 2");
        }
        if self.discovery.run_timeout_seconds == 0 {
            anyhow::bail!("run_timeout_seconds must be positive");
        }

        if self.validation.max_slippage <= Decimal::ZERO
            || self.validation.max_slippage >= Decimal::ONE
        {
            anyhow::bail!("max_slippage must be in (0, 1)");
        }
        if self.validation.max_price_impact <= Decimal::ZERO
            || self.validation.max_price_impact >= Decimal::ONE
        {
            anyhow::bail!("max_price_impact must be in (0, 1)");
        }
        if self.validation.max_gas_percentage <= Decimal::ZERO
            || self.validation.max_gas_percentage > dec!(100)
        {
            anyhow::bail!("max_gas_percentage must be in (0, 100]");
        }
        if self.validation.min_confidence_threshold < Decimal::ZERO
            || self.validation.min_confidence_threshold > Decimal::ONE
        {
            anyhow::bail!("min_confidence_threshold must be in [0, 1]");
        }

        if self.execution.max_concurrent_executions == 0 {
            anyhow::bail!("max_concurrent_executions must be positive");
        }
        if !(1..=8).contains(&self.execution.blocks_into_future) {
            anyhow::bail!("blocks_into_future must be in [1, 8]");
        }
        if self.execution.enable_flashbots && self.chain.flashbots_auth_key.is_empty() {
            anyhow::bail!("flashbots enabled but no relay authentication key configured");
        }

        if self.flash_loan.profit_threshold_multiplier < Decimal::ONE {
            anyhow::bail!("profit_threshold_multiplier must be at least 1");
        }
        if self.flash_loan.preferred_providers.is_empty() {
            anyhow::bail!("at least one flash loan provider must be preferred");
        }

        if self.tracker.poll_interval_seconds == 0 || self.tracker.max_attempts == 0 {
            anyhow::bail!("tracker polling parameters must be positive");
        }

        if self.chain.rpc_url.is_empty() {
            anyhow::bail!("rpc_url must be configured");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = EngineConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn spec_defaults_hold() {
        let config = EngineConfig::default();
        assert_eq!(config.discovery.discovery_interval_seconds, 10);
        assert_eq!(config.discovery.max_opportunities, 100);
        assert_eq!(config.discovery.max_concurrent_detectors, 5);
        assert_eq!(config.validation.max_slippage, dec!(0.005));
        assert_eq!(config.validation.min_liquidity_usd, dec!(10000));
        assert_eq!(config.validation.max_price_age_seconds, 15);
        assert_eq!(config.execution.max_concurrent_executions, 1);
        assert_eq!(config.execution.blocks_into_future, 2);
        assert_eq!(config.tracker.poll_interval_seconds, 2);
        assert_eq!(config.tracker.max_attempts, 30);
        assert_eq!(
            config.flash_loan.preferred_providers,
            vec!["zero-fee".to_string(), "lending-pool".to_string()]
        );
    }

    #[test]
    fn json_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.validation.max_slippage, config.validation.max_slippage);
        assert_eq!(
            back.execution.max_concurrent_executions,
            config.execution.max_concurrent_executions
        );
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let path = path.to_str().unwrap();

        let config = EngineConfig::default();
        config.save_to_file(path).unwrap();
        let back = EngineConfig::from_file(path).unwrap();
        assert_eq!(back.chain.chain_id, config.chain.chain_id);
    }

    #[test]
    fn invalid_ranges_rejected() {
        let mut config = EngineConfig::default();
        config.execution.blocks_into_future = 9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.validation.max_slippage = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.execution.enable_flashbots = true;
        config.chain.flashbots_auth_key.clear();
        assert!(config.validate().is_err());
    }
}
