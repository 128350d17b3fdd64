//! Settings Module
//!
//! Provides configuration loading for the account synchronization layer.
//! Supports loading from TOML files with environment-specific overrides.

use crate::service::{endpoints, sync};
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Group account address (base58)
    pub group: String,

    /// Websocket endpoint for account change subscriptions
    pub rpc_ws_url: String,

    /// Stats/history REST API base URL
    pub data_api_url: String,

    /// Polling cadences
    pub intervals: IntervalConfig,

    /// Background reload retry policy
    pub retry: RetryConfig,

    /// Initial market/bank selections
    pub defaults: SelectionDefaults,

    /// JSON file backing the persisted key-value store
    pub storage_path: Option<PathBuf>,

    pub log_level: String,
}

/// Independent polling cadences, one per upstream dataset
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IntervalConfig {
    pub group_ms: u64,
    pub account_ms: u64,
    pub open_orders_ms: u64,
    pub market_fills_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SelectionDefaults {
    pub market: String,
    pub bank: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            rpc_ws_url: endpoints::RPC_WS_URL.to_string(),
            data_api_url: endpoints::DATA_API_URL.to_string(),
            intervals: IntervalConfig::default(),
            retry: RetryConfig::default(),
            defaults: SelectionDefaults::default(),
            storage_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            group_ms: sync::GROUP_REFRESH_MS,
            account_ms: sync::ACCOUNT_RELOAD_MS,
            open_orders_ms: sync::OPEN_ORDERS_REFRESH_MS,
            market_fills_ms: sync::MARKET_FILLS_REFRESH_MS,
        }
    }
}

impl IntervalConfig {
    pub fn group(&self) -> Duration {
        Duration::from_millis(self.group_ms)
    }

    pub fn account(&self) -> Duration {
        Duration::from_millis(self.account_ms)
    }

    pub fn open_orders(&self) -> Duration {
        Duration::from_millis(self.open_orders_ms)
    }

    pub fn market_fills(&self) -> Duration {
        Duration::from_millis(self.market_fills_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: sync::RELOAD_MAX_ATTEMPTS,
            base_backoff_ms: sync::RETRY_BASE_BACKOFF_MS,
            max_backoff_ms: sync::RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl Default for SelectionDefaults {
    fn default() -> Self {
        Self {
            market: sync::DEFAULT_MARKET.to_string(),
            bank: sync::DEFAULT_BANK.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from files with environment overrides
    ///
    /// Without a base path only defaults and `MANGO_SYNC_*` variables apply.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(base) = base_path {
            builder = builder.add_source(File::from(base).required(true));
        }

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (MANGO_SYNC_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("MANGO_SYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let loaded: SyncConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate cadences, retry budget and endpoints
    pub fn validate(&self) -> Result<()> {
        let i = &self.intervals;
        if i.group_ms == 0 || i.account_ms == 0 || i.open_orders_ms == 0 || i.market_fills_ms == 0 {
            bail!("Polling intervals must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            bail!("Retry max_attempts must be at least 1");
        }

        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            bail!(
                "Retry base backoff {}ms exceeds max backoff {}ms",
                self.retry.base_backoff_ms,
                self.retry.max_backoff_ms
            );
        }

        if !self.rpc_ws_url.starts_with("ws://") && !self.rpc_ws_url.starts_with("wss://") {
            bail!("RPC websocket URL must start with ws:// or wss://");
        }

        if !self.data_api_url.starts_with("http://") && !self.data_api_url.starts_with("https://") {
            bail!("Data API URL must start with http:// or https://");
        }

        Ok(())
    }

    /// Expand environment variables in path and URL values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        self.rpc_ws_url = shellexpand::env(&self.rpc_ws_url)
            .context("Failed to expand RPC websocket URL")?
            .to_string();

        self.data_api_url = shellexpand::env(&self.data_api_url)
            .context("Failed to expand data API URL")?
            .to_string();

        if let Some(path) = &self.storage_path {
            let expanded = shellexpand::env(&path.to_string_lossy())
                .context("Failed to expand storage path")?
                .to_string();
            self.storage_path = Some(PathBuf::from(expanded));
        }

        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>, environment: Option<&str>) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(path, environment)?;
    config.expand_env_vars()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.intervals.group(), Duration::from_secs(25));
        assert_eq!(config.intervals.market_fills(), Duration::from_secs(6));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("sync.toml");

        let config_content = r#"
group = "78b8f4cGCwmZ9ysPFMWLaLTkkaYnUjwMJYStWe5RTSSX"
rpc_ws_url = "wss://rpc.example.org"
log_level = "debug"

[intervals]
group_ms = 10000
market_fills_ms = 2000

[defaults]
market = "ETH/USDC"
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = SyncConfig::load(Some(&config_path), None).unwrap();

        assert_eq!(config.group, "78b8f4cGCwmZ9ysPFMWLaLTkkaYnUjwMJYStWe5RTSSX");
        assert_eq!(config.rpc_ws_url, "wss://rpc.example.org");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.intervals.group_ms, 10_000);
        assert_eq!(config.intervals.market_fills_ms, 2_000);
        // Unspecified fields keep their defaults
        assert_eq!(config.intervals.open_orders_ms, sync::OPEN_ORDERS_REFRESH_MS);
        assert_eq!(config.defaults.market, "ETH/USDC");
        assert_eq!(config.defaults.bank, sync::DEFAULT_BANK);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("sync.toml");
        fs::write(&config_path, "[retry]\nmax_attempts = 0\n").unwrap();

        assert!(SyncConfig::load(Some(&config_path), None).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = SyncConfig::default();

        config.rpc_ws_url = "http://not-a-socket".to_string();
        assert!(config.validate().is_err());

        config.rpc_ws_url = "ws://localhost:8900".to_string();
        config.intervals.open_orders_ms = 0;
        assert!(config.validate().is_err());

        config.intervals.open_orders_ms = 1;
        config.retry.base_backoff_ms = 10_000;
        assert!(config.validate().is_err());
    }
}
