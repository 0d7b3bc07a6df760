// =============================================================================
// Shared types used across the scanner
// =============================================================================

use serde::{Deserialize, Serialize};

/// Exchange status string for instruments that are currently tradable.
pub const TRADING: &str = "TRADING";

/// One trading pair as listed in the exchange metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub market_cap_id: Option<u64>,
    #[serde(default)]
    pub market_cap_usd: Option<f64>,
}

impl Symbol {
    pub fn is_trading(&self) -> bool {
        self.status == TRADING
    }
}

/// Exchange metadata: the full symbol list of one exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<Symbol>,
}

/// Parsed row of the upstream `/ticker/24hr` endpoint, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub last_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub open_time: i64,
    pub close_time: i64,
}

/// Normalized 24-hour snapshot for one trading pair.
///
/// `volume_change_percent` and the `market_cap_*` fields are optional
/// enrichments layered onto the base snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot24h {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub last_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub volume_change_percent: Option<f64>,
    pub open_time: i64,
    pub close_time: i64,
    pub market_cap_id: Option<u64>,
    pub market_cap_usd: Option<f64>,
    pub trade_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<u8>>,
}

impl Snapshot24h {
    /// Build the base snapshot from an upstream row and its decomposition.
    pub fn from_ticker(
        ticker: Ticker24h,
        base_asset: String,
        quote_asset: String,
        trade_url: &str,
    ) -> Self {
        let trade_link = format!("{trade_url}{base_asset}_{quote_asset}");
        Self {
            symbol: ticker.symbol,
            base_asset,
            quote_asset,
            price_change: ticker.price_change,
            price_change_percent: round2(ticker.price_change_percent),
            last_price: ticker.last_price,
            high_price: ticker.high_price,
            low_price: ticker.low_price,
            volume: ticker.volume,
            quote_volume: ticker.quote_volume,
            volume_change_percent: None,
            open_time: ticker.open_time,
            close_time: ticker.close_time,
            market_cap_id: None,
            market_cap_usd: None,
            trade_link,
            icon: None,
        }
    }
}

/// Market-cap listing row for one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCapEntry {
    pub id: u64,
    pub symbol: String,
    pub name: String,
    pub market_cap_usd: f64,
    pub volume_24h_usd: f64,
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
