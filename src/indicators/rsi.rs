// =============================================================================
// Relative Strength Index (RSI): flat average over a trailing window
// =============================================================================
//
// Over the last `period_length` bars:
//
//   gains  = sum of positive close-to-close deltas
//   losses = sum of |negative close-to-close deltas|
//   RSI    = 100 * gains / (gains + losses),   50 when nothing moved
//
// This is the simple (unsmoothed) form: every delta in the window carries the
// same weight, and no state is carried between windows.
//
// Series must be sorted by close time, ascending.
// =============================================================================

use crate::market_data::Candle;

/// Neutral value for a window with no movement.
const NEUTRAL: f64 = 50.0;

/// RSI of the last `period_length` candles of `series` (all of them if the
/// series is shorter). Always in `[0, 100]`.
pub fn calculate(series: &[Candle], period_length: usize) -> f64 {
    let start = series.len().saturating_sub(period_length);
    rsi_of_window(&series[start..])
}

/// Set `rsi` on every candle that closes a full `period_length` window.
/// Candles before the first full window keep `None`.
pub fn tag_series(series: &mut [Candle], period_length: usize) {
    if period_length == 0 || period_length > series.len() {
        return;
    }
    for end in period_length..=series.len() {
        let value = rsi_of_window(&series[end - period_length..end]);
        series[end - 1].rsi = Some(value);
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

fn rsi_of_window(window: &[Candle]) -> f64 {
    let (gains, losses) = window
        .windows(2)
        .map(|pair| pair[1].close - pair[0].close)
        .fold((0.0_f64, 0.0_f64), |(g, l), delta| {
            (g + delta.max(0.0), l + (-delta).max(0.0))
        });

    let moved = gains + losses;
    if moved == 0.0 || !moved.is_finite() {
        NEUTRAL
    } else {
        100.0 * gains / moved
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn series(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTCUSDT".into(),
                open_time: i as i64 * 1000,
                close_time: i as i64 * 1000 + 999,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                quote_volume: close,
                trade_count: 1,
                rsi: None,
            })
            .collect()
    }

    // ---- calculate -------------------------------------------------------

    #[test]
    fn empty_and_single_bar_are_neutral() {
        assert_eq!(calculate(&[], 14), 50.0);
        assert_eq!(calculate(&series(&[10.0]), 14), 50.0);
    }

    #[test]
    fn flat_series_is_fifty() {
        assert_eq!(calculate(&series(&[100.0; 30]), 14), 50.0);
    }

    #[test]
    fn all_gains_is_one_hundred_all_losses_is_zero() {
        let up: Vec<f64> = (1..=20).map(f64::from).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert_eq!(calculate(&series(&up), 14), 100.0);
        assert_eq!(calculate(&series(&down), 14), 0.0);
    }

    #[test]
    fn only_the_trailing_window_counts() {
        // A crash early in the series is outside the 3-bar window.
        let closes = [100.0, 10.0, 11.0, 12.0, 13.0];
        assert_eq!(calculate(&series(&closes), 3), 100.0);
        // gains = 1 + 1 + 1, losses = 90
        let rsi = calculate(&series(&closes), 5);
        assert!((rsi - 300.0 / 93.0).abs() < 1e-9);
    }

    #[test]
    fn mixed_moves_use_flat_average() {
        // deltas: +2, -1, +3, -2  => gains 5, losses 3
        let rsi = calculate(&series(&[10.0, 12.0, 11.0, 14.0, 12.0]), 14);
        assert!((rsi - 62.5).abs() < 1e-9);
    }

    #[test]
    fn always_in_range() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for period in 0..closes.len() + 3 {
            let v = calculate(&series(&closes), period);
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range for period {period}");
        }
    }

    // ---- tag_series ------------------------------------------------------

    #[test]
    fn tagging_starts_at_first_full_window() {
        let mut s = series(&[1.0, 2.0, 3.0, 2.0, 1.0]);
        tag_series(&mut s, 3);
        assert!(s[0].rsi.is_none());
        assert!(s[1].rsi.is_none());
        assert_eq!(s[2].rsi, Some(100.0));
        assert_eq!(s[3].rsi, Some(50.0));
        assert_eq!(s[4].rsi, Some(0.0));
    }

    #[test]
    fn last_tag_matches_calculate() {
        let closes = [5.0, 7.0, 6.0, 9.0, 8.0, 8.5, 7.0, 10.0];
        let mut s = series(&closes);
        tag_series(&mut s, 4);
        assert_eq!(s.last().unwrap().rsi, Some(calculate(&s, 4)));
    }

    #[test]
    fn short_series_is_left_untagged() {
        let mut s = series(&[1.0, 2.0]);
        tag_series(&mut s, 14);
        assert!(s.iter().all(|c| c.rsi.is_none()));
        tag_series(&mut s, 0);
        assert!(s.iter().all(|c| c.rsi.is_none()));
    }
}
