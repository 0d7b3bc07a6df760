// =============================================================================
// Market Data Service: one per exchange
// =============================================================================
//
// Cache-aside access to everything the scanner exposes for an exchange:
//
//   exchange_info / markets / trading_pairs   ExchangeInfo container
//   snapshot_24h / all_snapshots_24h          AllTickers container (list only)
//   ticker_data / rsi_tickers                 Candles container
//
// A cold population of the full 24h list activates the refresh scheduler,
// which keeps that one entry warm for a bounded window and then lets it go.
//
// Upstream unavailability never reaches the caller: it reads as an empty
// result and nothing is cached. Malformed payloads and rejected requests
// (quota guard, bad interval/period) are returned as errors.
// =============================================================================

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheContainer, RefreshScheduler, RefreshSettings, TtlCache};
use crate::error::{ScannerError, ScannerResult};
use crate::exchange::client::{parse_exchange_info, parse_ticker_24h};
use crate::exchange::{ExchangeProfile, HttpFetch, SymbolResolver};
use crate::icons::Icons;
use crate::indicators::rsi;
use crate::market_cap::{MarketCapListing, MarketCapProvider};
use crate::market_data::{Candle, CandleFetcher, VolumeChangeCalculator};
use crate::types::{ExchangeInfo, Snapshot24h, Symbol, Ticker24h};

// =============================================================================
// Settings
// =============================================================================

fn default_volume_change_symbol_cap() -> usize {
    600
}

fn default_rsi_period_length() -> usize {
    14
}

fn default_rsi_symbol_cap() -> usize {
    15
}

/// Per-service tunables shared by every exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Above this many symbols the 24h list is not annotated with volume
    /// change (one candle request per symbol).
    #[serde(default = "default_volume_change_symbol_cap")]
    pub volume_change_symbol_cap: usize,

    #[serde(default = "default_rsi_period_length")]
    pub rsi_period_length: usize,

    /// Maximum symbols per `rsi_tickers` request.
    #[serde(default = "default_rsi_symbol_cap")]
    pub rsi_symbol_cap: usize,

    #[serde(default)]
    pub refresh: RefreshSettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            volume_change_symbol_cap: default_volume_change_symbol_cap(),
            rsi_period_length: default_rsi_period_length(),
            rsi_symbol_cap: default_rsi_symbol_cap(),
            refresh: RefreshSettings::default(),
        }
    }
}

/// External collaborators of a service.
#[derive(Clone)]
pub struct Collaborators {
    pub http: Arc<dyn HttpFetch>,
    pub cache: Arc<TtlCache>,
    pub market_cap: Option<Arc<dyn MarketCapProvider>>,
    pub icons: Option<Arc<Icons>>,
}

// =============================================================================
// Service
// =============================================================================

pub struct MarketDataService {
    inner: Arc<Inner>,
    refresher: RefreshScheduler<Vec<Snapshot24h>>,
}

/// State shared with the refresh task.
struct Inner {
    profile: ExchangeProfile,
    http: Arc<dyn HttpFetch>,
    cache: Arc<TtlCache>,
    candles: Arc<CandleFetcher>,
    volume: VolumeChangeCalculator,
    market_cap: Option<Arc<dyn MarketCapProvider>>,
    icons: Option<Arc<Icons>>,
    settings: ServiceSettings,
}

/// Everything needed to turn raw ticker rows into snapshots.
struct SnapshotContext {
    resolver: SymbolResolver,
    /// Listed pairs with status TRADING. Anything else is dropped.
    trading: HashSet<String>,
    listing: Option<Arc<MarketCapListing>>,
}

impl MarketDataService {
    pub fn new(profile: ExchangeProfile, deps: Collaborators, settings: ServiceSettings) -> Self {
        let candles = Arc::new(CandleFetcher::new(
            Arc::clone(&deps.http),
            profile.klines_url.clone(),
        ));
        let refresher = RefreshScheduler::new(
            profile.name.clone(),
            Arc::clone(&deps.cache),
            CacheContainer::AllTickers,
            all_tickers_key(&profile.name),
            settings.refresh,
        );
        let inner = Arc::new(Inner {
            volume: VolumeChangeCalculator::new(Arc::clone(&candles)),
            candles,
            http: deps.http,
            cache: deps.cache,
            market_cap: deps.market_cap,
            icons: deps.icons,
            profile,
            settings,
        });
        Self { inner, refresher }
    }

    pub fn name(&self) -> &str {
        &self.inner.profile.name
    }

    pub fn profile(&self) -> &ExchangeProfile {
        &self.inner.profile
    }

    // -------------------------------------------------------------------------
    // Exchange metadata
    // -------------------------------------------------------------------------

    /// Exchange symbol list, non-domestic markets removed. Empty while the
    /// exchange is unreachable.
    pub async fn exchange_info(&self) -> ScannerResult<Arc<ExchangeInfo>> {
        self.inner.exchange_info().await
    }

    /// Quote assets traded on the exchange.
    pub async fn markets(&self) -> ScannerResult<BTreeSet<String>> {
        let info = self.exchange_info().await?;
        Ok(info.symbols.iter().map(|s| s.quote_asset.clone()).collect())
    }

    /// Tradable, non-leveraged symbols with market cap joined.
    pub async fn trading_pairs(&self) -> ScannerResult<Vec<Symbol>> {
        let info = self.exchange_info().await?;
        let listing = self.inner.market_cap_listing().await?;
        let rules = &self.inner.profile.leverage_rules;

        let pairs: Vec<Symbol> = info
            .symbols
            .iter()
            .filter(|s| s.is_trading() && !rules.is_leveraged(&s.symbol, &s.base_asset))
            .map(|s| {
                let mut symbol = s.clone();
                if let Some(entry) = self.inner.market_cap_entry(listing.as_deref(), &s.base_asset) {
                    symbol.market_cap_id = Some(entry.0);
                    symbol.market_cap_usd = Some(entry.1);
                }
                symbol
            })
            .collect();
        debug!(exchange = %self.name(), count = pairs.len(), "trading pairs");
        Ok(pairs)
    }

    // -------------------------------------------------------------------------
    // 24h snapshots
    // -------------------------------------------------------------------------

    /// 24h snapshot for one pair. `None` when the pair is filtered out or the
    /// exchange is unreachable.
    #[instrument(skip(self), fields(exchange = %self.name()))]
    pub async fn snapshot_24h(&self, symbol: &str) -> ScannerResult<Option<Snapshot24h>> {
        let params = [("symbol", symbol.to_string())];
        let body = match self.inner.http.get_json(&self.inner.ticker_24h_url(), &params).await {
            Ok(body) => body,
            Err(e) if e.is_upstream_unavailable() => {
                warn!(error = %e, "24h ticker unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let ticker = parse_ticker_24h(&body)?;
        let ctx = self.inner.snapshot_context().await?;
        Ok(self.inner.to_snapshot(ticker, &ctx))
    }

    /// Full 24h list for the exchange, served from the AllTickers container.
    /// A cold population starts the background refresh.
    pub async fn all_snapshots_24h(&self) -> ScannerResult<Arc<Vec<Snapshot24h>>> {
        let key = all_tickers_key(self.name());
        let cold = AtomicBool::new(false);

        let result = self
            .inner
            .cache
            .get_or_compute(CacheContainer::AllTickers, &key, || {
                cold.store(true, Ordering::SeqCst);
                self.inner.load_all_snapshots()
            })
            .await;

        match result {
            Ok(snapshots) => {
                if cold.load(Ordering::SeqCst) {
                    self.activate_refresh();
                }
                Ok(snapshots)
            }
            Err(e) if e.is_upstream_unavailable() => {
                warn!(exchange = %self.name(), error = %e, "24h tickers unavailable");
                Ok(Arc::new(Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// One page of the 24h list. Pages are 1-based; page 0 is the whole list.
    pub async fn snapshots_page(&self, page: usize, page_size: usize) -> ScannerResult<Vec<Snapshot24h>> {
        let all = self.all_snapshots_24h().await?;
        if page == 0 {
            return Ok(all.as_ref().clone());
        }
        Ok(all
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect())
    }

    fn activate_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        self.refresher.activate(move || {
            let inner = Arc::clone(&inner);
            async move { inner.load_all_snapshots().await }
        });
    }

    /// Stop the background refresh and drop the cached 24h list.
    pub fn deactivate(&self) {
        self.refresher.deactivate();
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresher.is_active()
    }

    // -------------------------------------------------------------------------
    // Candles and RSI
    // -------------------------------------------------------------------------

    /// Candle series for `symbol` over `period` (e.g. "7d", "3M").
    pub async fn ticker_data(
        &self,
        symbol: &str,
        interval: &str,
        period: &str,
    ) -> ScannerResult<Arc<Vec<Candle>>> {
        let key = format!("{}-{symbol}-{interval}-{period}", self.name());
        let result = self
            .inner
            .cache
            .get_or_compute(CacheContainer::Candles, &key, || {
                self.inner.candles.fetch_period(symbol, interval, period)
            })
            .await;

        match result {
            Err(e) if e.is_upstream_unavailable() => {
                warn!(exchange = %self.name(), symbol, error = %e, "candles unavailable");
                Ok(Arc::new(Vec::new()))
            }
            other => other,
        }
    }

    /// Latest RSI-tagged candle for each symbol. Too many symbols yields an
    /// empty result; a failing symbol is left out.
    pub async fn rsi_tickers(&self, symbols: &[String], interval: &str, period: &str) -> Vec<Candle> {
        let cap = self.inner.settings.rsi_symbol_cap;
        if symbols.len() > cap {
            warn!(
                exchange = %self.name(),
                requested = symbols.len(),
                cap,
                "too many symbols for RSI request"
            );
            return Vec::new();
        }

        let period_length = self.inner.settings.rsi_period_length;
        let lookups = symbols.iter().map(|symbol| async move {
            let candles = self.ticker_data(symbol, interval, period).await?;
            let mut series = candles.as_ref().clone();
            rsi::tag_series(&mut series, period_length);
            Ok::<_, ScannerError>(series.pop())
        });

        join_all(lookups)
            .await
            .into_iter()
            .zip(symbols)
            .filter_map(|(result, symbol)| match result {
                Ok(latest) => latest,
                Err(e) => {
                    warn!(exchange = %self.name(), symbol = %symbol, error = %e, "RSI skipped");
                    None
                }
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Icons
    // -------------------------------------------------------------------------

    /// Icon bytes for a base asset; empty when the coin has no icon. `None`
    /// when no icon provider is configured.
    pub async fn icon(&self, base_asset: &str) -> Option<Arc<Vec<u8>>> {
        match &self.inner.icons {
            Some(icons) => Some(icons.icon(base_asset).await),
            None => None,
        }
    }
}

impl Inner {
    fn ticker_24h_url(&self) -> String {
        format!("{}/24hr", self.profile.ticker_url.trim_end_matches('/'))
    }

    async fn exchange_info(&self) -> ScannerResult<Arc<ExchangeInfo>> {
        let result = self
            .cache
            .get_or_compute(CacheContainer::ExchangeInfo, &self.profile.name, || {
                self.fetch_exchange_info()
            })
            .await;

        match result {
            Err(e) if e.is_upstream_unavailable() => {
                warn!(exchange = %self.profile.name, error = %e, "exchange info unavailable");
                Ok(Arc::new(ExchangeInfo::default()))
            }
            other => other,
        }
    }

    #[instrument(skip(self), fields(exchange = %self.profile.name))]
    async fn fetch_exchange_info(&self) -> ScannerResult<ExchangeInfo> {
        let body = self.http.get_json(&self.profile.exchange_info_url, &[]).await?;
        let mut info = parse_exchange_info(&body)?;
        let listed = info.symbols.len();
        info.symbols
            .retain(|s| self.profile.is_domestic_market(&s.quote_asset));
        info!(listed, kept = info.symbols.len(), "exchange info loaded");
        Ok(info)
    }

    /// Market-cap listing, or `None` when there is no provider or it is
    /// unreachable.
    async fn market_cap_listing(&self) -> ScannerResult<Option<Arc<MarketCapListing>>> {
        let Some(provider) = &self.market_cap else {
            return Ok(None);
        };
        match provider.listing().await {
            Ok(listing) => Ok(Some(listing)),
            Err(e) if e.is_upstream_unavailable() => {
                warn!(exchange = %self.profile.name, error = %e, "market cap unavailable, skipping join");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `(id, market_cap_usd)` for a base asset.
    fn market_cap_entry(&self, listing: Option<&MarketCapListing>, base_asset: &str) -> Option<(u64, f64)> {
        listing?
            .get(self.profile.market_cap_symbol(base_asset))
            .map(|e| (e.id, e.market_cap_usd))
    }

    async fn snapshot_context(&self) -> ScannerResult<SnapshotContext> {
        let info = self.exchange_info().await?;
        let trading = info
            .symbols
            .iter()
            .filter(|s| s.is_trading())
            .map(|s| s.symbol.clone())
            .collect();
        Ok(SnapshotContext {
            resolver: SymbolResolver::from_exchange_info(&info),
            trading,
            listing: self.market_cap_listing().await?,
        })
    }

    fn to_snapshot(&self, ticker: Ticker24h, ctx: &SnapshotContext) -> Option<Snapshot24h> {
        let (base, quote) = ctx.resolver.resolve(&ticker.symbol);
        if !ctx.trading.contains(&ticker.symbol)
            || !self.profile.is_domestic_market(&quote)
            || self.profile.leverage_rules.is_leveraged(&ticker.symbol, &base)
        {
            return None;
        }

        let mut snapshot = Snapshot24h::from_ticker(ticker, base, quote, &self.profile.trade_url);
        if let Some((id, cap)) = self.market_cap_entry(ctx.listing.as_deref(), &snapshot.base_asset) {
            snapshot.market_cap_id = Some(id);
            snapshot.market_cap_usd = Some(cap);
        }
        Some(snapshot)
    }

    /// Fetch and enrich the full 24h list.
    #[instrument(skip(self), fields(exchange = %self.profile.name))]
    async fn load_all_snapshots(&self) -> ScannerResult<Vec<Snapshot24h>> {
        // Without the symbol list every row would be dropped or mis-split, so
        // the load fails and nothing is cached.
        let ctx = self.snapshot_context().await?;
        if ctx.trading.is_empty() {
            return Err(ScannerError::upstream(
                &self.profile.exchange_info_url,
                "no trading symbols available",
            ));
        }

        let body = self.http.get_json(&self.ticker_24h_url(), &[]).await?;
        let rows = match body {
            Value::Array(rows) => rows,
            row @ Value::Object(_) => vec![row],
            other => {
                return Err(ScannerError::malformed(
                    "ticker/24hr",
                    format!("expected array, got {other}"),
                ))
            }
        };

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(snapshot) = self.to_snapshot(parse_ticker_24h(row)?, &ctx) {
                snapshots.push(snapshot);
            }
        }

        if self.profile.volume_change {
            let cap = self.settings.volume_change_symbol_cap;
            if snapshots.len() <= cap {
                self.volume.annotate(&mut snapshots).await;
            } else {
                warn!(symbols = snapshots.len(), cap, "too many symbols, volume change skipped");
            }
        }

        if let Some(icons) = &self.icons {
            for snapshot in &mut snapshots {
                let bytes = icons.icon(&snapshot.base_asset).await;
                if !bytes.is_empty() {
                    snapshot.icon = Some(bytes.as_ref().clone());
                }
            }
        }

        info!(rows = rows.len(), kept = snapshots.len(), "24h snapshots loaded");
        Ok(snapshots)
    }
}

fn all_tickers_key(exchange: &str) -> String {
    format!("{exchange}-ALL_TICKERS")
}
