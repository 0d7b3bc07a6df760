// =============================================================================
// Candle Fetcher: kline windows larger than one upstream page
// =============================================================================
//
// The kline endpoint returns at most 500 candles per call. Windows are sized
// up front as `points = window / interval`:
//
//   points <= 500          one call
//   500 < points <= 1000   bisect at the midpoint, fetch both halves
//                          concurrently, merge by close time
//   points > 1000          QuotaGuardExceeded, nothing is sent
//
// The two halves share the midpoint, so the candle opening there can come back
// twice; the merge drops duplicates by open time.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use super::candle::{Candle, Interval, Period, DAY_MS};
use crate::error::{ScannerError, ScannerResult};
use crate::exchange::HttpFetch;

/// Maximum number of candles the exchange returns for one request.
pub const MAX_POINTS_PER_REQUEST: i64 = 500;
/// At most this many requests are issued for one window.
const MAX_REQUESTS_PER_WINDOW: i64 = 2;

pub struct CandleFetcher {
    http: Arc<dyn HttpFetch>,
    klines_url: String,
}

impl CandleFetcher {
    pub fn new(http: Arc<dyn HttpFetch>, klines_url: impl Into<String>) -> Self {
        Self {
            http,
            klines_url: klines_url.into(),
        }
    }

    /// Candles for `symbol` between two epoch-millisecond instants.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        interval: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> ScannerResult<Vec<Candle>> {
        let interval = Interval::parse(interval)?;
        let label = format!("{from_ms}..{to_ms}");
        self.fetch_window(symbol, &interval, &label, from_ms, to_ms).await
    }

    /// Candles for `symbol` over a lookback period ending now.
    pub async fn fetch_period(
        &self,
        symbol: &str,
        interval: &str,
        period: &str,
    ) -> ScannerResult<Vec<Candle>> {
        self.fetch_period_at(symbol, interval, period, Utc::now()).await
    }

    /// `fetch_period` with an explicit "now".
    pub async fn fetch_period_at(
        &self,
        symbol: &str,
        interval: &str,
        period: &str,
        now: DateTime<Utc>,
    ) -> ScannerResult<Vec<Candle>> {
        let interval = Interval::parse(interval)?;
        let parsed = Period::parse(period)?;
        let days = parsed.lookback_days(now.date_naive())?;

        let to_ms = now.timestamp_millis();
        let from_ms = to_ms - days * DAY_MS;
        self.fetch_window(symbol, &interval, period, from_ms, to_ms).await
    }

    async fn fetch_window(
        &self,
        symbol: &str,
        interval: &Interval,
        period_label: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> ScannerResult<Vec<Candle>> {
        let points = (to_ms - from_ms).max(0) / interval.duration_ms();

        if points > MAX_POINTS_PER_REQUEST * MAX_REQUESTS_PER_WINDOW {
            return Err(ScannerError::QuotaGuardExceeded {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                period: period_label.to_string(),
                points,
            });
        }

        if points <= MAX_POINTS_PER_REQUEST {
            return self.fetch_klines(symbol, interval, from_ms, to_ms).await;
        }

        let mid_ms = from_ms + (to_ms - from_ms) / 2;
        debug!(symbol, points, mid_ms, "splitting candle window in two");
        let (older, newer) = tokio::join!(
            self.fetch_klines(symbol, interval, from_ms, mid_ms),
            self.fetch_klines(symbol, interval, mid_ms, to_ms),
        );

        let mut candles = older?;
        candles.extend(newer?);
        Ok(merge_sorted(candles))
    }

    #[instrument(skip(self, interval), fields(interval = %interval))]
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &Interval,
        from_ms: i64,
        to_ms: i64,
    ) -> ScannerResult<Vec<Candle>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.upstream()),
            ("startTime", from_ms.to_string()),
            ("endTime", to_ms.to_string()),
        ];
        let body = self.http.get_json(&self.klines_url, &params).await?;

        let rows = match &body {
            Value::Array(rows) => rows,
            other => {
                return Err(ScannerError::malformed(
                    "klines",
                    format!("expected array, got {other}"),
                ))
            }
        };

        let candles = rows
            .iter()
            .map(|row| Candle::from_kline_row(symbol, row))
            .collect::<ScannerResult<Vec<_>>>()?;
        debug!(count = candles.len(), "klines received");
        Ok(candles)
    }
}

/// Sort by close time and drop candles that share an open time.
fn merge_sorted(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| (c.close_time, c.open_time));
    candles.dedup_by_key(|c| c.open_time);
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testing::{param, MockFetch};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    const HOUR: i64 = 3_600_000;

    fn interval_ms(raw: &str) -> i64 {
        match raw {
            "1d" => DAY_MS,
            "15m" => 15 * 60_000,
            other => other.trim_end_matches('h').parse::<i64>().unwrap() * HOUR,
        }
    }

    /// Serves one candle per interval step inside [startTime, endTime].
    fn kline_server() -> MockFetch {
        MockFetch::new(|_, params| {
            let start: i64 = param(params, "startTime").unwrap().parse().unwrap();
            let end: i64 = param(params, "endTime").unwrap().parse().unwrap();
            let step = interval_ms(param(params, "interval").unwrap());
            let rows: Vec<Value> = (0..)
                .map(|i| start + i * step)
                .take_while(|t| *t <= end)
                .map(|t| {
                    json!([t, "1.0", "2.0", "0.5", "1.5", "10.0", t + step - 1, "15.0", 3])
                })
                .collect();
            Ok(Value::Array(rows))
        })
    }

    #[tokio::test]
    async fn small_window_is_one_call() {
        let http = Arc::new(kline_server());
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");

        let candles = fetcher.fetch_range("BTCUSDT", "1h", 0, 500 * HOUR).await.unwrap();

        assert_eq!(http.call_count(), 1);
        assert_eq!(candles.len(), 501);
        let (url, params) = &http.calls()[0];
        assert_eq!(url, "http://x/klines");
        assert_eq!(param(params, "symbol"), Some("BTCUSDT"));
        assert_eq!(param(params, "interval"), Some("1h"));
    }

    #[tokio::test(start_paused = true)]
    async fn large_window_is_split_into_two_concurrent_calls() {
        let http = Arc::new(kline_server().with_delay(Duration::from_millis(50)));
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");

        let candles = fetcher.fetch_range("BTCUSDT", "1h", 0, 720 * HOUR).await.unwrap();

        assert_eq!(http.call_count(), 2);
        assert_eq!(http.max_in_flight(), 2);
        // Both halves return the candle opening at the midpoint; it is kept once.
        assert_eq!(candles.len(), 721);
        assert!(candles.windows(2).all(|w| w[0].close_time < w[1].close_time));
        assert!(candles.windows(2).all(|w| w[0].open_time != w[1].open_time));
    }

    #[tokio::test]
    async fn oversized_window_is_rejected_before_any_call() {
        let http = Arc::new(kline_server());
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");

        let err = fetcher
            .fetch_range("BTCUSDT", "1h", 0, 1001 * HOUR)
            .await
            .unwrap_err();

        assert!(matches!(err, ScannerError::QuotaGuardExceeded { points: 1001, .. }));
        assert!(err.to_string().contains("too much data requested"));
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn period_in_months_is_guarded() {
        let http = Arc::new(kline_server());
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

        // 92 days of hourly candles.
        let err = fetcher.fetch_period_at("ETHBTC", "1h", "3M", now).await.unwrap_err();
        assert!(matches!(err, ScannerError::QuotaGuardExceeded { .. }));
        assert_eq!(http.call_count(), 0);

        // May 15 to June 15 is 31 days, 744 hourly points: split.
        let candles = fetcher.fetch_period_at("ETHBTC", "1h", "1M", now).await.unwrap();
        assert_eq!(http.call_count(), 2);
        assert!(!candles.is_empty());
    }

    #[tokio::test]
    async fn daily_interval_is_sent_as_one_day() {
        let http = Arc::new(kline_server());
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();

        let candles = fetcher.fetch_period_at("ETHBTC", "24h", "3M", now).await.unwrap();

        assert_eq!(http.call_count(), 1);
        assert_eq!(param(&http.calls()[0].1, "interval"), Some("1d"));
        assert_eq!(candles.len(), 93);
    }

    #[tokio::test]
    async fn bad_grammar_is_rejected() {
        let http = Arc::new(kline_server());
        let fetcher = CandleFetcher::new(http.clone(), "http://x/klines");

        let err = fetcher.fetch_period("ETHBTC", "1h", "30d").await.unwrap_err();
        assert!(matches!(err, ScannerError::InvalidPeriod(_)));
        let err = fetcher.fetch_period("ETHBTC", "1w", "3d").await.unwrap_err();
        assert!(matches!(err, ScannerError::InvalidInterval(_)));
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn non_array_body_is_malformed() {
        let http = Arc::new(MockFetch::new(|_, _| Ok(json!({ "code": -1121 }))));
        let fetcher = CandleFetcher::new(http, "http://x/klines");

        let err = fetcher.fetch_range("NOPE", "1h", 0, HOUR).await.unwrap_err();
        assert!(matches!(err, ScannerError::MalformedUpstreamData { .. }));
    }
}
