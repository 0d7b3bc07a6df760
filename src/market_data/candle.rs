use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ScannerError, ScannerResult};
use crate::exchange::client::{parse_f64, parse_i64};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV candle from the kline endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    /// Set by `indicators::rsi::tag_series`.
    #[serde(default)]
    pub rsi: Option<f64>,
}

impl Candle {
    /// Parse one kline tuple:
    /// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`.
    pub fn from_kline_row(symbol: &str, row: &Value) -> ScannerResult<Self> {
        let fields = row
            .as_array()
            .ok_or_else(|| ScannerError::malformed("kline", format!("expected array, got {row}")))?;
        if fields.len() < 9 {
            return Err(ScannerError::malformed(
                "kline",
                format!("expected at least 9 fields, got {}", fields.len()),
            ));
        }

        let trade_count = fields[8]
            .as_u64()
            .ok_or_else(|| ScannerError::malformed("kline.trades", format!("expected integer, got {}", fields[8])))?;

        Ok(Self {
            symbol: symbol.to_string(),
            open_time: parse_i64(&fields[0], "kline.openTime")?,
            open: parse_f64(&fields[1], "kline.open")?,
            high: parse_f64(&fields[2], "kline.high")?,
            low: parse_f64(&fields[3], "kline.low")?,
            close: parse_f64(&fields[4], "kline.close")?,
            volume: parse_f64(&fields[5], "kline.volume")?,
            close_time: parse_i64(&fields[6], "kline.closeTime")?,
            quote_volume: parse_f64(&fields[7], "kline.quoteVolume")?,
            trade_count,
            rsi: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Interval, candle width ("4h", "15m", "1d")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub amount: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn parse(raw: &str) -> ScannerResult<Self> {
        let invalid = || ScannerError::InvalidInterval(raw.to_string());
        let (amount, unit) = split_amount(raw).ok_or_else(invalid)?;
        let unit = match unit {
            "m" => IntervalUnit::Minutes,
            "h" | "H" => IntervalUnit::Hours,
            "d" => IntervalUnit::Days,
            _ => return Err(invalid()),
        };
        if amount == 0 {
            return Err(invalid());
        }
        Ok(Self { amount, unit })
    }

    pub fn duration_ms(&self) -> i64 {
        let unit_ms = match self.unit {
            IntervalUnit::Minutes => MINUTE_MS,
            IntervalUnit::Hours => HOUR_MS,
            IntervalUnit::Days => DAY_MS,
        };
        i64::from(self.amount) * unit_ms
    }

    /// Interval string as the kline endpoint expects it. The exchange has no
    /// `24h` width, so a full day of hours is sent as `1d`.
    pub fn upstream(&self) -> String {
        match (self.unit, self.amount) {
            (IntervalUnit::Hours, 24) => "1d".to_string(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            IntervalUnit::Minutes => "m",
            IntervalUnit::Hours => "h",
            IntervalUnit::Days => "d",
        };
        write!(f, "{}{}", self.amount, unit)
    }
}

// ---------------------------------------------------------------------------
// Period, lookback window ("7d", "3M")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Days(u32),
    Months(u32),
}

impl Period {
    /// `<digit>d` for days (one digit only), `<int>M` or `<int>m` for months.
    pub fn parse(raw: &str) -> ScannerResult<Self> {
        let invalid = || ScannerError::InvalidPeriod(raw.to_string());
        let (amount, unit) = split_amount(raw).ok_or_else(invalid)?;
        match unit {
            "d" if raw.len() == 2 => Ok(Self::Days(amount)),
            "M" | "m" if amount > 0 => Ok(Self::Months(amount)),
            _ => Err(invalid()),
        }
    }

    /// Number of days the period spans when counted back from `today`.
    /// Months use calendar subtraction, so "1M" in March is 28 or 29 days.
    pub fn lookback_days(&self, today: NaiveDate) -> ScannerResult<i64> {
        match *self {
            Self::Days(days) => Ok(i64::from(days)),
            Self::Months(months) => today
                .checked_sub_months(Months::new(months))
                .map(|start| (today - start).num_days())
                .ok_or_else(|| ScannerError::InvalidPeriod(self.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(d) => write!(f, "{d}d"),
            Self::Months(m) => write!(f, "{m}M"),
        }
    }
}

/// Split "12h" into (12, "h"). The unit is the single trailing character.
fn split_amount(raw: &str) -> Option<(u32, &str)> {
    let idx = raw.len().checked_sub(1)?;
    if !raw.is_char_boundary(idx) {
        return None;
    }
    let (digits, unit) = raw.split_at(idx);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (n, unit))
}
