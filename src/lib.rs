// =============================================================================
// crypto-scanner: market-data aggregation and refresh-cache core
// =============================================================================
//
// Pulls 24h tickers, candles and exchange metadata from Binance-shaped REST
// APIs, enriches them with market-cap figures and serves them from a TTL
// cache kept warm by a bounded background refresher.
// =============================================================================

pub mod app_state;
pub mod cache;
pub mod error;
pub mod exchange;
pub mod icons;
pub mod indicators;
pub mod market_cap;
pub mod market_data;
pub mod market_data_service;
pub mod runtime_config;
pub mod types;

pub use app_state::ScannerState;
pub use error::{ScannerError, ScannerResult};
pub use market_data_service::MarketDataService;
pub use runtime_config::RuntimeConfig;
