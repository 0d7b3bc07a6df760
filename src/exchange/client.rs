// =============================================================================
// Exchange REST client: reqwest-backed `HttpFetch` plus payload parsers
// =============================================================================
//
// Only public market-data endpoints are used, so no request signing is
// needed. Every request is checked against the shared `RateLimitTracker`
// before it leaves the process, and the tracker is updated from the response
// headers afterwards.
//
// Numeric fields arrive as decimal strings. Parse failures are reported as
// `MalformedUpstreamData` and are not recovered here.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use super::rate_limit::RateLimitTracker;
use super::HttpFetch;
use crate::error::{ScannerError, ScannerResult};
use crate::types::{ExchangeInfo, Symbol, Ticker24h};

/// Weight charged for calls without a specific entry below (klines, one
/// 24h ticker, market-cap listing).
const DEFAULT_REQUEST_WEIGHT: u32 = 2;
/// `ticker/24hr` without a `symbol` parameter returns every pair.
const ALL_TICKERS_WEIGHT: u32 = 80;
const EXCHANGE_INFO_WEIGHT: u32 = 20;

/// Pre-flight weight of one request, following the exchange's published
/// endpoint weights.
pub fn request_weight(url: &str, params: &[(&str, String)]) -> u32 {
    let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
    if path.ends_with("/exchangeInfo") {
        EXCHANGE_INFO_WEIGHT
    } else if path.ends_with("/ticker/24hr") && !params.iter().any(|(k, _)| *k == "symbol") {
        ALL_TICKERS_WEIGHT
    } else {
        DEFAULT_REQUEST_WEIGHT
    }
}

/// `HttpFetch` implementation over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl ReqwestFetcher {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a fetcher with the given request timeout and default headers
    /// (e.g. an API-key header for the market-cap provider).
    pub fn new(
        timeout: Duration,
        headers: &[(&str, &str)],
        rate_limit: Arc<RateLimitTracker>,
    ) -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?;
            default_headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(timeout_ms = timeout.as_millis() as u64, "ReqwestFetcher initialised");
        Ok(Self { client, rate_limit })
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limit
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    #[instrument(skip(self, params), name = "exchange::get_json")]
    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> ScannerResult<Value> {
        if !self.rate_limit.can_send_request(request_weight(url, params)) {
            return Err(ScannerError::upstream(url, "local rate-limit budget exhausted"));
        }

        let resp = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| ScannerError::upstream(url, e))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScannerError::upstream(url, format!("status {status}: {body}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ScannerError::malformed(url, e))?;

        if body.is_null() {
            return Err(ScannerError::upstream(url, "null response body"));
        }

        debug!(url, "upstream response received");
        Ok(body)
    }
}

impl std::fmt::Debug for ReqwestFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestFetcher")
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

// =============================================================================
// Payload parsers
// =============================================================================

/// Parse a JSON value that may be either a decimal string or a number.
pub fn parse_f64(val: &Value, context: &str) -> ScannerResult<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| ScannerError::malformed(context, format!("'{s}': {e}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ScannerError::malformed(context, format!("{n} is not a valid f64"))),
        other => Err(ScannerError::malformed(
            context,
            format!("expected string or number, got {other}"),
        )),
    }
}

/// Parse an integer field (timestamps, trade counts).
pub fn parse_i64(val: &Value, context: &str) -> ScannerResult<i64> {
    val.as_i64()
        .ok_or_else(|| ScannerError::malformed(context, format!("expected integer, got {val}")))
}

/// Parse an `exchangeInfo` body. Accepts `{ "symbols": [...] }` or a bare
/// array of symbol objects.
pub fn parse_exchange_info(body: &Value) -> ScannerResult<ExchangeInfo> {
    let rows = body
        .get("symbols")
        .unwrap_or(body)
        .as_array()
        .ok_or_else(|| ScannerError::malformed("exchangeInfo", "symbols is not an array"))?;

    let symbols = rows
        .iter()
        .map(|row| {
            serde_json::from_value::<Symbol>(row.clone())
                .map_err(|e| ScannerError::malformed("exchangeInfo.symbols", e))
        })
        .collect::<ScannerResult<Vec<_>>>()?;

    Ok(ExchangeInfo { symbols })
}

/// Parse one row of the `/ticker/24hr` endpoint.
pub fn parse_ticker_24h(row: &Value) -> ScannerResult<Ticker24h> {
    let symbol = row["symbol"]
        .as_str()
        .ok_or_else(|| ScannerError::malformed("ticker.symbol", "missing field"))?
        .to_string();

    Ok(Ticker24h {
        price_change: parse_f64(&row["priceChange"], "ticker.priceChange")?,
        price_change_percent: parse_f64(&row["priceChangePercent"], "ticker.priceChangePercent")?,
        last_price: parse_f64(&row["lastPrice"], "ticker.lastPrice")?,
        high_price: parse_f64(&row["highPrice"], "ticker.highPrice")?,
        low_price: parse_f64(&row["lowPrice"], "ticker.lowPrice")?,
        volume: parse_f64(&row["volume"], "ticker.volume")?,
        quote_volume: parse_f64(&row["quoteVolume"], "ticker.quoteVolume")?,
        open_time: parse_i64(&row["openTime"], "ticker.openTime")?,
        close_time: parse_i64(&row["closeTime"], "ticker.closeTime")?,
        symbol,
    })
}
