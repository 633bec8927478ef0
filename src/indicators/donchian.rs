// =============================================================================
// Donchian Channel — highest-high / lowest-low over a trailing window
// =============================================================================
//
// The channel position locates the close inside the band: 0 at the channel
// low, 1 at the channel high. A flat window yields a neutral 0.5.
// =============================================================================

use crate::market_data::Bar;

/// Full channel series aligned to the input bars (NaN during warmup).
#[derive(Debug, Clone)]
pub struct DonchianSeries {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub position: Vec<f64>,
}

pub fn donchian_series(bars: &[Bar], period: usize) -> DonchianSeries {
    let n = bars.len();
    let nan = vec![f64::NAN; n];
    let mut out = DonchianSeries {
        upper: nan.clone(),
        lower: nan.clone(),
        position: nan,
    };
    if period == 0 || n < period {
        return out;
    }

    for i in (period - 1)..n {
        let window = &bars[i + 1 - period..=i];
        let upper = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lower = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        out.upper[i] = upper;
        out.lower[i] = lower;
        out.position[i] = if upper > lower {
            (bars[i].close - lower) / (upper - lower)
        } else {
            0.5
        };
    }

    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i);
        Bar::new(ts, close, high, low, close, 1.0)
    }

    #[test]
    fn donchian_insufficient_data() {
        let bars: Vec<Bar> = (0..5).map(|i| candle(i, 101.0, 99.0, 100.0)).collect();
        let out = donchian_series(&bars, 20);
        assert!(out.upper.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn channel_brackets_window_extremes() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 5.0;
                candle(i, base + 1.0, base - 1.0, base)
            })
            .collect();
        let out = donchian_series(&bars, 20);
        let i = 29;
        let window = &bars[10..=29];
        let max_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let min_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        assert!((out.upper[i] - max_high).abs() < 1e-12);
        assert!((out.lower[i] - min_low).abs() < 1e-12);
    }

    #[test]
    fn breakout_close_sits_at_channel_top() {
        let mut bars: Vec<Bar> = (0..25).map(|i| candle(i, 101.0, 99.0, 100.0)).collect();
        bars.push(candle(25, 105.0, 100.0, 105.0));
        let out = donchian_series(&bars, 20);
        assert!((out.position.last().unwrap() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn flat_window_is_neutral() {
        let bars: Vec<Bar> = (0..25).map(|i| candle(i, 100.0, 100.0, 100.0)).collect();
        let out = donchian_series(&bars, 20);
        assert!((out.position.last().unwrap() - 0.5).abs() < 1e-10);
    }
}
