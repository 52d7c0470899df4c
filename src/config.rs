//! Cross-recipe application configuration: exchange credentials, default
//! commission/slippage, and the storage path. Recipe-level settings
//! (capital, risk, indicators) live in the `Recipe` itself, not here.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Loaded from a JSON file (secrets excluded) with an environment-variable
/// overlay applied afterward for exchange API key/secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub defaults: ExecutionDefaults,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            defaults: ExecutionDefaults::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Loads a JSON config file, then overlays `EXCHANGE_API_KEY` /
    /// `EXCHANGE_API_SECRET` from the environment (and `.env`, via
    /// `dotenv`) if present, so credentials never need to live on disk in
    /// plaintext next to the rest of the config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenv::dotenv();
        let contents = fs::read_to_string(path.as_ref()).context("failed to read config file")?;
        let mut config: Config = serde_json::from_str(&contents).context("failed to parse config JSON")?;
        config.apply_env_overlay();
        Ok(config)
    }

    /// Config with no file backing, environment overlay only. Used by CLI
    /// subcommands that don't require a config file (e.g. `test-auth`).
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Config::default();
        config.apply_env_overlay();
        config
    }

    fn apply_env_overlay(&mut self) {
        if let Ok(api_key) = std::env::var("EXCHANGE_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("EXCHANGE_API_SECRET") {
            self.exchange.api_secret = Some(api_secret);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub base_url: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            base_url: "https://api.binance.com".to_string(),
        }
    }
}

/// Fallback commission/slippage applied when a recipe or CLI invocation
/// doesn't specify its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    pub commission_percent: f64,
    pub slippage_percent: f64,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            commission_percent: 0.1,
            slippage_percent: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/engine.db".to_string(),
        }
    }
}
