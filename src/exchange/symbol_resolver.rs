// =============================================================================
// Symbol Resolver: split a trading pair into (base, quote)
// =============================================================================
//
// Exchanges publish pairs as concatenated strings ("ZILBUSD", "BNBUSD"). The
// exchange's own symbol list is authoritative; pairs missing from it fall back
// to a suffix heuristic over the exchange's quote markets:
//
//   1. Pair ends with "BUSD" and is longer than 6 chars  => quote is "BUSD".
//   2. Longest known market that is a suffix of the pair => quote.
//      "BUSD" is only a candidate under rule 1, so "BNBUSD" splits BNB/USD.
//   3. Nothing matched                                   => last 3 chars.
//
// Resolution is total: it never fails, the worst case is a wrong split.
// =============================================================================

use std::collections::{BTreeSet, HashMap};

use crate::types::ExchangeInfo;

const BUSD: &str = "BUSD";
const BUSD_MIN_PAIR_LEN: usize = 7;
const DEFAULT_QUOTE_LEN: usize = 3;

/// Resolver built from one exchange's metadata.
#[derive(Debug, Clone, Default)]
pub struct SymbolResolver {
    listed: HashMap<String, (String, String)>,
    markets: BTreeSet<String>,
}

impl SymbolResolver {
    pub fn from_exchange_info(info: &ExchangeInfo) -> Self {
        let listed = info
            .symbols
            .iter()
            .map(|s| (s.symbol.clone(), (s.base_asset.clone(), s.quote_asset.clone())))
            .collect();
        let markets = info.symbols.iter().map(|s| s.quote_asset.clone()).collect();
        Self { listed, markets }
    }

    /// Quote markets known to the exchange.
    pub fn markets(&self) -> &BTreeSet<String> {
        &self.markets
    }

    /// Decompose `pair` into `(base, quote)`.
    pub fn resolve(&self, pair: &str) -> (String, String) {
        match self.listed.get(pair) {
            Some(split) => split.clone(),
            None => resolve_quote(pair, &self.markets),
        }
    }
}

/// Heuristic decomposition against a set of known quote markets.
pub fn resolve_quote(pair: &str, known_markets: &BTreeSet<String>) -> (String, String) {
    let quote_len = quote_length(pair, known_markets);
    let mut split = pair.len().saturating_sub(quote_len);
    while !pair.is_char_boundary(split) {
        split -= 1;
    }
    (pair[..split].to_string(), pair[split..].to_string())
}

fn quote_length(pair: &str, known_markets: &BTreeSet<String>) -> usize {
    if pair.ends_with(BUSD) && pair.len() >= BUSD_MIN_PAIR_LEN {
        return BUSD.len();
    }

    known_markets
        .iter()
        .filter(|m| !m.is_empty() && m.as_str() != BUSD && pair.ends_with(m.as_str()))
        .map(String::len)
        .max()
        .unwrap_or(DEFAULT_QUOTE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;

    fn markets(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn split(base: &str, quote: &str) -> (String, String) {
        (base.to_string(), quote.to_string())
    }

    #[test]
    fn busd_wins_for_long_pairs() {
        let m = markets(&["USD", "BUSD", "USDT", "BTC"]);
        assert_eq!(resolve_quote("ZILBUSD", &m), split("ZIL", "BUSD"));
        assert_eq!(resolve_quote("DOGEBUSD", &m), split("DOGE", "BUSD"));
        // Even when the exchange does not list BUSD as a market.
        assert_eq!(resolve_quote("ZILBUSD", &markets(&["USD"])), split("ZIL", "BUSD"));
    }

    #[test]
    fn short_busd_ending_pair_is_usd_quoted() {
        let m = markets(&["USD", "BUSD", "USDT"]);
        assert_eq!(resolve_quote("BNBUSD", &m), split("BNB", "USD"));
    }

    #[test]
    fn longest_suffix_wins() {
        // Both "USDT" and "DT"-style overlaps: the longer market is chosen
        // regardless of set ordering.
        let m = markets(&["T", "USDT", "SDT"]);
        assert_eq!(resolve_quote("BTCUSDT", &m), split("BTC", "USDT"));
        let m = markets(&["TUSD", "USD"]);
        assert_eq!(resolve_quote("BTCTUSD", &m), split("BTC", "TUSD"));
    }

    #[test]
    fn unknown_market_defaults_to_three_chars() {
        assert_eq!(resolve_quote("LTCXYZ", &markets(&["USDT"])), split("LTC", "XYZ"));
    }

    #[test]
    fn short_pairs_never_panic() {
        let m = markets(&["USDT"]);
        assert_eq!(resolve_quote("AB", &m), split("", "AB"));
        assert_eq!(resolve_quote("", &m), split("", ""));
        assert_eq!(resolve_quote("USDT", &m), split("", "USDT"));
    }

    #[test]
    fn listed_symbols_are_authoritative() {
        let info = ExchangeInfo {
            symbols: vec![Symbol {
                symbol: "BNBUSD".into(),
                base_asset: "BN".into(),
                quote_asset: "BUSD".into(),
                status: "TRADING".into(),
                market_cap_id: None,
                market_cap_usd: None,
            }],
        };
        let resolver = SymbolResolver::from_exchange_info(&info);
        assert_eq!(resolver.resolve("BNBUSD"), split("BN", "BUSD"));
        assert!(resolver.markets().contains("BUSD"));
        // Unlisted pairs use the heuristic over the exchange's markets.
        assert_eq!(resolver.resolve("ZILBUSD"), split("ZIL", "BUSD"));
    }
}
