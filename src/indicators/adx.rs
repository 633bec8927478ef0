// =============================================================================
// Average Directional Index (ADX) and Directional Indicators (+DI / -DI)
// =============================================================================
//
// Pipeline:
//   1. +DM / -DM and True Range per bar-to-bar transition.
//   2. Wilder's smoothing over `period`.
//   3. +DI = smoothed(+DM) / smoothed(TR) * 100, -DI analogous.
//   4. DX  = |+DI - -DI| / (+DI + -DI) * 100
//   5. ADX = Wilder's smoothed average of DX over `period`.
//
// DI values become available at index `period`; ADX needs a further `period`
// DX values and becomes available at index `2 * period`.
// =============================================================================

use crate::market_data::Bar;

/// Latest-point snapshot of the directional system.
#[derive(Debug, Clone, Copy)]
pub struct Dmi {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Full directional series aligned to the input bars (NaN during warmup).
#[derive(Debug, Clone)]
pub struct DmiSeries {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

/// Compute ADX / +DI / -DI series for the given bars.
pub fn dmi_series(bars: &[Bar], period: usize) -> DmiSeries {
    let n = bars.len();
    let mut out = DmiSeries {
        adx: vec![f64::NAN; n],
        plus_di: vec![f64::NAN; n],
        minus_di: vec![f64::NAN; n],
    };

    if period == 0 || n < 2 * period + 1 {
        return out;
    }

    let period_f = period as f64;
    let transitions = n - 1;

    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let prev_close = bars[i - 1].close;
        tr_vals.push(
            (bars[i].high - bars[i].low)
                .max((bars[i].high - prev_close).abs())
                .max((bars[i].low - prev_close).abs()),
        );
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    // DX values indexed by the bar they complete at (bar index = transition + 1).
    let mut dx_values: Vec<f64> = Vec::with_capacity(transitions - period + 1);

    let record = |out: &mut DmiSeries, bar_idx: usize, sp: f64, sm: f64, st: f64| -> Option<f64> {
        if st == 0.0 {
            return None;
        }
        let plus_di = sp / st * 100.0;
        let minus_di = sm / st * 100.0;
        out.plus_di[bar_idx] = plus_di;
        out.minus_di[bar_idx] = minus_di;
        let di_sum = plus_di + minus_di;
        if di_sum == 0.0 {
            Some(0.0)
        } else {
            Some((plus_di - minus_di).abs() / di_sum * 100.0)
        }
    };

    match record(&mut out, period, smooth_plus, smooth_minus, smooth_tr) {
        Some(dx) => dx_values.push(dx),
        None => return out,
    }

    for t in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[t];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[t];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[t];

        match record(&mut out, t + 1, smooth_plus, smooth_minus, smooth_tr) {
            Some(dx) => dx_values.push(dx),
            None => return out,
        }
    }

    if dx_values.len() < period {
        return out;
    }

    let mut adx = dx_values[..period].iter().sum::<f64>() / period_f;
    out.adx[2 * period] = adx;
    for (j, &dx) in dx_values.iter().enumerate().skip(period) {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
        out.adx[period + j + 1] = adx;
    }

    out
}

/// Most recent ADX value (conventional reading: > 25 trending, < 20 ranging).
pub fn calculate_adx(bars: &[Bar], period: usize) -> Option<f64> {
    let series = dmi_series(bars, period);
    let last = *series.adx.last()?;
    if last.is_finite() {
        Some(last)
    } else {
        None
    }
}

/// Most recent ADX / +DI / -DI triple.
pub fn calculate_dmi(bars: &[Bar], period: usize) -> Option<Dmi> {
    let series = dmi_series(bars, period);
    let adx = *series.adx.last()?;
    let plus_di = *series.plus_di.last()?;
    let minus_di = *series.minus_di.last()?;
    if adx.is_finite() && plus_di.is_finite() && minus_di.is_finite() {
        Some(Dmi {
            adx,
            plus_di,
            minus_di,
        })
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i);
        Bar::new(ts, open, high, low, close, 1.0)
    }

    #[test]
    fn adx_period_zero() {
        let bars: Vec<Bar> = (0..50).map(|i| candle(i, 1.0, 2.0, 0.5, 1.5)).collect();
        assert!(calculate_adx(&bars, 0).is_none());
    }

    #[test]
    fn adx_insufficient_data() {
        let bars: Vec<Bar> = (0..10).map(|i| candle(i, 1.0, 2.0, 0.5, 1.5)).collect();
        assert!(calculate_adx(&bars, 14).is_none());
    }

    #[test]
    fn adx_strong_uptrend() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i, base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        let value = calculate_adx(&bars, 14).unwrap();
        assert!(value > 25.0, "expected ADX > 25 for strong trend, got {value}");

        let dmi = calculate_dmi(&bars, 14).unwrap();
        assert!(
            dmi.plus_di > dmi.minus_di,
            "uptrend must have +DI > -DI: {dmi:?}"
        );
    }

    #[test]
    fn adx_strong_downtrend_di_ordering() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 300.0 - i as f64 * 2.0;
                candle(i, base, base + 0.5, base - 1.5, base - 1.0)
            })
            .collect();
        let dmi = calculate_dmi(&bars, 14).unwrap();
        assert!(dmi.minus_di > dmi.plus_di, "downtrend must have -DI > +DI");
        assert!(dmi.adx > 25.0);
    }

    #[test]
    fn adx_result_range() {
        let bars: Vec<Bar> = (0..100)
            .map(|i| {
                let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
                candle(i, base - 0.5, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        if let Some(value) = calculate_adx(&bars, 14) {
            assert!((0.0..=100.0).contains(&value), "ADX {value} out of range");
        }
    }

    #[test]
    fn series_warmup_boundaries() {
        let period = 5;
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(i, base, base + 1.0, base - 0.5, base + 0.5)
            })
            .collect();
        let series = dmi_series(&bars, period);
        assert!(series.plus_di[period - 1].is_nan());
        assert!(series.plus_di[period].is_finite());
        assert!(series.adx[2 * period - 1].is_nan());
        assert!(series.adx[2 * period].is_finite());
    }

    #[test]
    fn series_is_prefix_stable() {
        let bars: Vec<Bar> = (0..80)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).cos() * 8.0;
                candle(i, base, base + 1.2, base - 1.2, base + 0.3)
            })
            .collect();
        let full = dmi_series(&bars, 14);
        let partial = dmi_series(&bars[..50], 14);
        for i in 0..50 {
            let (a, b) = (full.adx[i], partial.adx[i]);
            assert!(
                (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12,
                "adx mismatch at {i}"
            );
        }
    }
}
