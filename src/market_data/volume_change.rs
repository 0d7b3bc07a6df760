// =============================================================================
// 24h Volume Change
// =============================================================================
//
// The ticker endpoint reports only the current 24h volume. The change against
// the previous 24h is rebuilt from 15-minute candles covering the last 48h,
// ending 15 minutes ago so the still-open candle is not counted:
//
//   window   = [now - 15m - 48h, now - 15m]
//   boundary = now - 24h
//   previous = sum(quote_volume) where close_time <= boundary
//   current  = sum(quote_volume) where close_time >  boundary
//   pct      = (current - previous) / previous * 100, rounded to 2 decimals
//
// A zero previous day leaves the value unset.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::candle::{Candle, DAY_MS};
use super::candle_fetcher::CandleFetcher;
use crate::types::{round2, Snapshot24h};

const CANDLE_INTERVAL: &str = "15m";
const QUARTER_HOUR_MS: i64 = 15 * 60_000;

pub struct VolumeChangeCalculator {
    candles: Arc<CandleFetcher>,
}

impl VolumeChangeCalculator {
    pub fn new(candles: Arc<CandleFetcher>) -> Self {
        Self { candles }
    }

    /// Fill `volume_change_percent` on every snapshot, one fetch per symbol,
    /// all in flight together. A failing symbol is left unset.
    pub async fn annotate(&self, snapshots: &mut [Snapshot24h]) {
        self.annotate_at(snapshots, Utc::now().timestamp_millis()).await;
    }

    pub async fn annotate_at(&self, snapshots: &mut [Snapshot24h], now_ms: i64) {
        let to_ms = now_ms - QUARTER_HOUR_MS;
        let from_ms = to_ms - 2 * DAY_MS;
        let boundary_ms = now_ms - DAY_MS;

        let symbols: Vec<String> = snapshots.iter().map(|s| s.symbol.clone()).collect();
        let fetches = symbols.iter().map(|symbol| {
            self.candles
                .fetch_range(symbol, CANDLE_INTERVAL, from_ms, to_ms)
        });
        let results = join_all(fetches).await;

        let mut annotated = 0usize;
        for (snapshot, result) in snapshots.iter_mut().zip(results) {
            match result {
                Ok(candles) => {
                    snapshot.volume_change_percent = volume_change_percent(candles, boundary_ms);
                    annotated += usize::from(snapshot.volume_change_percent.is_some());
                }
                Err(e) => {
                    warn!(symbol = %snapshot.symbol, error = %e, "volume change unavailable");
                }
            }
        }
        debug!(total = snapshots.len(), annotated, "24h volume change annotated");
    }
}

/// Percentage change of quote volume after `boundary_ms` against the volume
/// up to and including it.
pub fn volume_change_percent(mut candles: Vec<Candle>, boundary_ms: i64) -> Option<f64> {
    candles.sort_by_key(|c| c.close_time);
    let split = candles.partition_point(|c| c.close_time <= boundary_ms);
    let (previous, current) = candles.split_at(split);

    let previous: f64 = previous.iter().map(|c| c.quote_volume).sum();
    let current: f64 = current.iter().map(|c| c.quote_volume).sum();

    if previous == 0.0 {
        return None;
    }
    let pct = round2((current - previous) / previous * 100.0);
    pct.is_finite().then_some(pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScannerError;
    use crate::exchange::testing::{param, MockFetch};
    use serde_json::json;

    fn candle(close_time: i64, quote_volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            open_time: close_time - QUARTER_HOUR_MS + 1,
            close_time,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            quote_volume,
            trade_count: 1,
            rsi: None,
        }
    }

    fn snapshot(symbol: &str) -> Snapshot24h {
        Snapshot24h {
            symbol: symbol.into(),
            base_asset: String::new(),
            quote_asset: String::new(),
            price_change: 0.0,
            price_change_percent: 0.0,
            last_price: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            volume: 0.0,
            quote_volume: 0.0,
            volume_change_percent: None,
            open_time: 0,
            close_time: 0,
            market_cap_id: None,
            market_cap_usd: None,
            trade_link: String::new(),
            icon: None,
        }
    }

    #[test]
    fn doubling_volume_is_one_hundred_percent() {
        let boundary = 1_000;
        let candles = vec![candle(1_200, 40.0), candle(900, 10.0), candle(1_000, 10.0)];
        // previous = 10 + 10 (boundary inclusive), current = 40
        assert_eq!(volume_change_percent(candles, boundary), Some(100.0));
    }

    #[test]
    fn falling_volume_is_negative_and_rounded() {
        let candles = vec![candle(1, 30.0), candle(3, 10.0)];
        assert_eq!(volume_change_percent(candles, 2), Some(-66.67));
    }

    #[test]
    fn zero_previous_day_leaves_value_unset() {
        let candles = vec![candle(5, 0.0), candle(10, 50.0)];
        assert_eq!(volume_change_percent(candles, 5), None);
        assert_eq!(volume_change_percent(Vec::new(), 5), None);
    }

    #[tokio::test]
    async fn annotate_skips_failing_symbols() {
        let now_ms = 10 * DAY_MS;
        let boundary = now_ms - DAY_MS;
        let http = Arc::new(MockFetch::new(move |url, params| {
            match param(params, "symbol") {
                Some("BADUSDT") => Err(ScannerError::upstream(url, "timeout")),
                _ => Ok(json!([
                    [boundary - 900_000, "1", "1", "1", "1", "1", boundary, "20.0", 1],
                    [boundary, "1", "1", "1", "1", "1", boundary + 900_000, "25.0", 1]
                ])),
            }
        }));
        let fetcher = Arc::new(CandleFetcher::new(http.clone(), "http://x/klines"));
        let calc = VolumeChangeCalculator::new(fetcher);

        let mut snaps = vec![snapshot("BTCUSDT"), snapshot("BADUSDT")];
        calc.annotate_at(&mut snaps, now_ms).await;

        assert_eq!(snaps[0].volume_change_percent, Some(25.0));
        assert_eq!(snaps[1].volume_change_percent, None);
        assert_eq!(http.call_count(), 2);

        let (_, params) = &http.calls()[0];
        assert_eq!(param(params, "interval"), Some("15m"));
        let end: i64 = param(params, "endTime").unwrap().parse().unwrap();
        let start: i64 = param(params, "startTime").unwrap().parse().unwrap();
        assert_eq!(end, now_ms - QUARTER_HOUR_MS);
        assert_eq!(end - start, 2 * DAY_MS);
    }
}
