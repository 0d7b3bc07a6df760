// =============================================================================
// Scanner State: per-process hub
// =============================================================================
//
// Owns the shared cache and one `MarketDataService` per configured exchange.
// Controllers look services up by exchange name; on shutdown every refresh
// scheduler is stopped.
//
// Thread safety:
//   - The cache manages its own locking.
//   - Services are immutable after construction and shared through `Arc`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheContainer, TtlCache};
use crate::exchange::rate_limit::RateLimitSnapshot;
use crate::exchange::{HttpFetch, RateLimitTracker, ReqwestFetcher};
use crate::icons::{DirectoryIconProvider, Icons};
use crate::market_cap::{CoinMarketCapClient, MarketCapProvider, API_KEY_HEADER};
use crate::market_data_service::{Collaborators, MarketDataService};
use crate::runtime_config::RuntimeConfig;

// =============================================================================
// Status snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeStatus {
    pub name: String,
    pub refreshing: bool,
}

/// Point-in-time view of the process for health endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub started_at: String,
    pub uptime_secs: i64,
    pub exchanges: Vec<ExchangeStatus>,
    pub cached_entries: HashMap<CacheContainer, usize>,
    pub rate_limit: RateLimitSnapshot,
}

// =============================================================================
// ScannerState
// =============================================================================

pub struct ScannerState {
    pub config: RuntimeConfig,
    pub cache: Arc<TtlCache>,
    rate_limit: Arc<RateLimitTracker>,
    services: Vec<Arc<MarketDataService>>,
    started_at: DateTime<Utc>,
}

impl ScannerState {
    /// Build the production state: reqwest clients for the exchanges and the
    /// market-cap provider, plus icons when an icon directory is configured.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let rate_limit = Arc::new(RateLimitTracker::new());
        let exchange_http: Arc<dyn HttpFetch> = Arc::new(
            ReqwestFetcher::new(config.http_timeout(), &[], Arc::clone(&rate_limit))
                .context("failed to build exchange HTTP client")?,
        );

        let cache = Arc::new(TtlCache::with_policies(config.cache_policies()));

        let market_cap: Option<Arc<dyn MarketCapProvider>> = if config.market_cap.enabled {
            let key = config.market_cap.api_key.clone().unwrap_or_default();
            let headers = [(API_KEY_HEADER, key.as_str()), ("Accept", "application/json")];
            let cmc_http = ReqwestFetcher::new(
                config.http_timeout(),
                &headers,
                Arc::new(RateLimitTracker::new()),
            )
            .context("failed to build market-cap HTTP client")?;
            Some(Arc::new(CoinMarketCapClient::new(
                Arc::new(cmc_http),
                config.market_cap.listing_url.clone(),
                Arc::clone(&cache),
            )))
        } else {
            None
        };

        Ok(Self::with_collaborators(config, exchange_http, cache, rate_limit, market_cap))
    }

    /// Build the state around already-constructed collaborators.
    pub fn with_collaborators(
        config: RuntimeConfig,
        http: Arc<dyn HttpFetch>,
        cache: Arc<TtlCache>,
        rate_limit: Arc<RateLimitTracker>,
        market_cap: Option<Arc<dyn MarketCapProvider>>,
    ) -> Self {
        let icons = config.icon_dir.as_ref().map(|dir| {
            Arc::new(Icons::new(
                Arc::new(DirectoryIconProvider::new(dir)),
                Arc::clone(&cache),
            ))
        });

        let deps = Collaborators {
            http,
            cache: Arc::clone(&cache),
            market_cap,
            icons,
        };
        let services = config
            .exchanges
            .iter()
            .map(|profile| {
                Arc::new(MarketDataService::new(
                    profile.clone(),
                    deps.clone(),
                    config.service.clone(),
                ))
            })
            .collect();

        info!(exchanges = ?config.exchange_names(), "scanner state initialised");

        Self {
            config,
            cache,
            rate_limit,
            services,
            started_at: Utc::now(),
        }
    }

    pub fn service(&self, exchange: &str) -> Option<&Arc<MarketDataService>> {
        self.services
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(exchange))
    }

    pub fn services(&self) -> &[Arc<MarketDataService>] {
        &self.services
    }

    pub fn status(&self) -> ScannerStatus {
        let now = Utc::now();
        ScannerStatus {
            started_at: self.started_at.to_rfc3339(),
            uptime_secs: (now - self.started_at).num_seconds(),
            exchanges: self
                .services
                .iter()
                .map(|s| ExchangeStatus {
                    name: s.name().to_string(),
                    refreshing: s.is_refreshing(),
                })
                .collect(),
            cached_entries: CacheContainer::ALL
                .iter()
                .map(|&c| (c, self.cache.len(c)))
                .collect(),
            rate_limit: self.rate_limit.snapshot(),
        }
    }

    /// Stop every background refresh.
    pub fn shutdown(&self) {
        for service in &self.services {
            service.deactivate();
        }
        info!("all refresh schedulers stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testing::MockFetch;
    use serde_json::json;

    fn state() -> ScannerState {
        let http = Arc::new(MockFetch::new(|url, _| {
            if url.ends_with("exchangeInfo") {
                Ok(json!({ "symbols": [
                    { "symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT", "status": "TRADING" }
                ]}))
            } else {
                Ok(json!([{
                    "symbol": "BTCUSDT", "priceChange": "1", "priceChangePercent": "1",
                    "lastPrice": "1", "highPrice": "1", "lowPrice": "1", "volume": "1",
                    "quoteVolume": "1", "openTime": 0, "closeTime": 1
                }]))
            }
        }));
        let mut config = RuntimeConfig::default();
        for profile in &mut config.exchanges {
            profile.volume_change = false;
        }
        ScannerState::with_collaborators(
            config,
            http,
            Arc::new(TtlCache::new()),
            Arc::new(RateLimitTracker::new()),
            None,
        )
    }

    #[tokio::test]
    async fn services_are_looked_up_by_name() {
        let state = state();
        assert_eq!(state.services().len(), 2);
        assert_eq!(state.service("binance").unwrap().name(), "binance");
        assert_eq!(state.service("BinanceUSA").unwrap().name(), "binanceusa");
        assert!(state.service("kraken").is_none());
    }

    #[tokio::test]
    async fn status_reports_refresh_and_cache() {
        let state = state();
        let binance = state.service("binance").unwrap();
        assert_eq!(binance.all_snapshots_24h().await.unwrap().len(), 1);

        let status = state.status();
        assert!(status.exchanges[0].refreshing);
        assert!(!status.exchanges[1].refreshing);
        assert_eq!(status.cached_entries[&CacheContainer::AllTickers], 1);
        assert_eq!(status.cached_entries[&CacheContainer::ExchangeInfo], 1);

        state.shutdown();
        let status = state.status();
        assert!(status.exchanges.iter().all(|e| !e.refreshing));
        assert_eq!(status.cached_entries[&CacheContainer::AllTickers], 0);
    }
}
