// =============================================================================
// Exchange profile: everything that differs between Binance-shaped exchanges
// =============================================================================
//
// One `MarketDataService` serves any exchange described by a profile: the
// endpoints, which quote markets are filtered out, how leveraged tokens are
// recognised, and which base assets are listed under another symbol by the
// market-cap provider.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_non_domestic_markets() -> Vec<String> {
    ["NGN", "RUB", "TRY", "EUR", "ZAR", "BKRW", "IDRT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// Naming heuristics for leveraged tokens. The exchanges expose no
/// authoritative flag, so these are matched against the symbol strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageRules {
    /// Base-asset suffixes marking a leveraged token (`BTCDOWN`, `ETHUP`).
    pub base_suffixes: Vec<String>,
    /// Substrings of the trading pair marking a leveraged token (`ETHBULL`).
    pub pair_infixes: Vec<String>,
}

impl Default for LeverageRules {
    fn default() -> Self {
        Self {
            base_suffixes: vec!["UP".into(), "DOWN".into()],
            pair_infixes: vec!["BULL".into(), "BEAR".into()],
        }
    }
}

impl LeverageRules {
    /// Pure name matching: a plain coin whose ticker happens to end in a
    /// suffix (`JUP`, `SYRUP`) is excluded along with the leveraged tokens.
    pub fn is_leveraged(&self, pair: &str, base_asset: &str) -> bool {
        let by_suffix = self
            .base_suffixes
            .iter()
            .any(|s| base_asset.len() > s.len() && base_asset.ends_with(s.as_str()));
        by_suffix || self.pair_infixes.iter().any(|s| pair.contains(s.as_str()))
    }
}

/// Static description of one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeProfile {
    /// Short name used as cache-key prefix and for lookups (`binance`).
    pub name: String,
    pub exchange_info_url: String,
    /// Base ticker URL; `/24hr` is appended.
    pub ticker_url: String,
    pub klines_url: String,
    /// Prefix of the human trade page; `BASE_QUOTE` is appended.
    pub trade_url: String,

    /// Quote markets that are dropped from every listing.
    #[serde(default = "default_non_domestic_markets")]
    pub non_domestic_markets: Vec<String>,

    #[serde(default)]
    pub leverage_rules: LeverageRules,

    /// Exchange base asset → market-cap symbol (`BQX` → `VGX`).
    #[serde(default)]
    pub market_cap_aliases: HashMap<String, String>,

    /// Whether the all-tickers snapshot is annotated with the 24h volume
    /// change. Exchanges with thousands of pairs should leave this off.
    #[serde(default = "default_true")]
    pub volume_change: bool,
}

impl ExchangeProfile {
    pub fn binance() -> Self {
        Self {
            name: "binance".into(),
            exchange_info_url: "https://api.binance.com/api/v3/exchangeInfo".into(),
            ticker_url: "https://api.binance.com/api/v3/ticker".into(),
            klines_url: "https://api.binance.com/api/v3/klines".into(),
            trade_url: "https://www.binance.com/en/trade/".into(),
            non_domestic_markets: default_non_domestic_markets(),
            leverage_rules: LeverageRules::default(),
            market_cap_aliases: default_aliases(),
            volume_change: false,
        }
    }

    pub fn binance_usa() -> Self {
        Self {
            name: "binanceusa".into(),
            exchange_info_url: "https://api.binance.us/api/v3/exchangeInfo".into(),
            ticker_url: "https://api.binance.us/api/v3/ticker".into(),
            klines_url: "https://api.binance.us/api/v3/klines".into(),
            trade_url: "https://www.binance.us/en/trade/".into(),
            non_domestic_markets: default_non_domestic_markets(),
            leverage_rules: LeverageRules::default(),
            market_cap_aliases: default_aliases(),
            volume_change: true,
        }
    }

    pub fn is_domestic_market(&self, quote_asset: &str) -> bool {
        !self.non_domestic_markets.iter().any(|m| m == quote_asset)
    }

    /// Symbol under which the market-cap provider lists `base_asset`.
    pub fn market_cap_symbol<'a>(&'a self, base_asset: &'a str) -> &'a str {
        self.market_cap_aliases
            .get(base_asset)
            .map(String::as_str)
            .unwrap_or(base_asset)
    }
}

fn default_aliases() -> HashMap<String, String> {
    [("BQX", "VGX"), ("YOYO", "YOYOW"), ("PHB", "PHX"), ("GXS", "GXC"), ("WNXM", "NXM")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
