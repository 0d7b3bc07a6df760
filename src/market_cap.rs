// =============================================================================
// Market-cap listing: CoinMarketCap "listings/latest"
// =============================================================================
//
// The listing is one large request (up to 5000 coins) that changes slowly, so
// it is fetched once per MarketCap-container TTL and shared by every exchange.
// Rows are keyed by ticker symbol. Several coins can share a symbol; the
// listing is ranked, so the first row for a symbol wins.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use crate::cache::{CacheContainer, TtlCache};
use crate::error::{ScannerError, ScannerResult};
use crate::exchange::client::parse_f64;
use crate::exchange::HttpFetch;
use crate::types::MarketCapEntry;

/// Header carrying the CoinMarketCap API key.
pub const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

const LISTING_CACHE_KEY: &str = "coinmarketcap-listing";
const LISTING_LIMIT: u32 = 5000;

pub type MarketCapListing = HashMap<String, MarketCapEntry>;

/// Source of market-cap figures keyed by coin symbol.
#[async_trait]
pub trait MarketCapProvider: Send + Sync {
    async fn listing(&self) -> ScannerResult<Arc<MarketCapListing>>;
}

pub struct CoinMarketCapClient {
    http: Arc<dyn HttpFetch>,
    listing_url: String,
    cache: Arc<TtlCache>,
}

impl CoinMarketCapClient {
    pub fn new(http: Arc<dyn HttpFetch>, listing_url: impl Into<String>, cache: Arc<TtlCache>) -> Self {
        Self {
            http,
            listing_url: listing_url.into(),
            cache,
        }
    }

    #[instrument(skip(self), name = "market_cap::fetch_listing")]
    async fn fetch_listing(&self) -> ScannerResult<MarketCapListing> {
        let params = [
            ("start", "1".to_string()),
            ("limit", LISTING_LIMIT.to_string()),
            ("convert", "USD".to_string()),
        ];
        let body = self.http.get_json(&self.listing_url, &params).await?;
        let listing = parse_listing(&body)?;
        info!(coins = listing.len(), "market-cap listing fetched");
        Ok(listing)
    }
}

#[async_trait]
impl MarketCapProvider for CoinMarketCapClient {
    async fn listing(&self) -> ScannerResult<Arc<MarketCapListing>> {
        self.cache
            .get_or_compute(CacheContainer::MarketCap, LISTING_CACHE_KEY, || self.fetch_listing())
            .await
    }
}

/// Parse a `listings/latest` body into a symbol-keyed map.
pub fn parse_listing(body: &Value) -> ScannerResult<MarketCapListing> {
    let rows = body["data"]
        .as_array()
        .ok_or_else(|| ScannerError::malformed("listing", "data is not an array"))?;

    let mut listing = MarketCapListing::with_capacity(rows.len());
    for row in rows {
        let entry = parse_entry(row)?;
        listing.entry(entry.symbol.clone()).or_insert(entry);
    }
    Ok(listing)
}

fn parse_entry(row: &Value) -> ScannerResult<MarketCapEntry> {
    let id = row["id"]
        .as_u64()
        .ok_or_else(|| ScannerError::malformed("listing.id", format!("expected integer, got {}", row["id"])))?;
    let symbol = row["symbol"]
        .as_str()
        .ok_or_else(|| ScannerError::malformed("listing.symbol", "missing field"))?;
    let name = row["name"].as_str().unwrap_or_default();

    let usd = &row["quote"]["USD"];
    Ok(MarketCapEntry {
        id,
        symbol: symbol.to_string(),
        name: name.to_string(),
        market_cap_usd: optional_f64(&usd["market_cap"], "listing.quote.USD.market_cap")?,
        volume_24h_usd: optional_f64(&usd["volume_24h"], "listing.quote.USD.volume_24h")?,
    })
}

/// Unranked coins report `null` figures; those count as zero.
fn optional_f64(val: &Value, context: &str) -> ScannerResult<f64> {
    if val.is_null() {
        Ok(0.0)
    } else {
        parse_f64(val, context)
    }
}
