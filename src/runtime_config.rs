// =============================================================================
// Runtime Configuration: scanner settings loaded from JSON
// =============================================================================
//
// Every field carries a serde default so that a partial (or empty) config
// file is always valid, and adding fields never breaks an older file.
//
// Environment overrides, applied after loading:
//   SCANNER_EXCHANGES   comma-separated profile names to serve ("binance,binanceusa")
//   CMC_API_KEY         CoinMarketCap API key
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{CacheContainer, CachePolicy};
use crate::exchange::ExchangeProfile;
use crate::market_data_service::ServiceSettings;

pub const EXCHANGES_ENV: &str = "SCANNER_EXCHANGES";
pub const CMC_API_KEY_ENV: &str = "CMC_API_KEY";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_exchanges() -> Vec<ExchangeProfile> {
    vec![ExchangeProfile::binance(), ExchangeProfile::binance_usa()]
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_listing_url() -> String {
    "https://pro-api.coinmarketcap.com/v1/cryptocurrency/listings/latest".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Sections
// =============================================================================

/// CoinMarketCap access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Normally supplied through `CMC_API_KEY` rather than the file.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for MarketCapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listing_url: default_listing_url(),
            api_key: None,
        }
    }
}

/// Override for one cache container's policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CachePolicyConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Exchange profiles served by this process.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeProfile>,

    #[serde(default)]
    pub market_cap: MarketCapConfig,

    /// Volume-change cap, RSI limits and refresh cadence.
    #[serde(default)]
    pub service: ServiceSettings,

    /// Per-container overrides of the default cache policies.
    #[serde(default)]
    pub cache: HashMap<CacheContainer, CachePolicyConfig>,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Directory of `<asset>.png` coin icons. No icons when unset.
    #[serde(default)]
    pub icon_dir: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchanges: default_exchanges(),
            market_cap: MarketCapConfig::default(),
            service: ServiceSettings::default(),
            cache: HashMap::new(),
            http_timeout_secs: default_http_timeout_secs(),
            icon_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            exchanges = ?config.exchange_names(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `SCANNER_EXCHANGES` and `CMC_API_KEY` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(EXCHANGES_ENV).ok(),
            std::env::var(CMC_API_KEY_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, exchanges: Option<String>, api_key: Option<String>) {
        if let Some(list) = exchanges {
            let wanted: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            for name in &wanted {
                if !self.exchanges.iter().any(|p| &p.name == name) {
                    warn!(exchange = %name, "unknown exchange in {EXCHANGES_ENV}, ignored");
                }
            }
            if !wanted.is_empty() {
                self.exchanges.retain(|p| wanted.contains(&p.name));
            }
        }

        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.market_cap.api_key = Some(key.trim().to_string());
        }
    }

    pub fn exchange_names(&self) -> Vec<&str> {
        self.exchanges.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cache_policies(&self) -> HashMap<CacheContainer, CachePolicy> {
        self.cache
            .iter()
            .map(|(&container, p)| {
                (
                    container,
                    CachePolicy {
                        ttl: Duration::from_secs(p.ttl_secs),
                        max_entries: p.max_entries,
                    },
                )
            })
            .collect()
    }
}
