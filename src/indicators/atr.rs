// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Series functions return one value per input bar, with `NaN` for warmup
// positions; the feature generator drops warmup rows before publishing.
// =============================================================================

use crate::market_data::Bar;

/// True range per bar. The first bar has no previous close, so its TR is the
/// plain high-low range.
pub fn true_range_series(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        out.push(tr);
    }
    out
}

/// Full ATR series aligned to `bars` (NaN until index `period`).
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    // TR values for bar-to-bar transitions (index i corresponds to bars[i]).
    let mut tr = Vec::with_capacity(n - 1);
    for i in 1..n {
        let prev_close = bars[i - 1].close;
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - prev_close).abs();
        let lc = (bars[i].low - prev_close).abs();
        tr.push(hl.max(hc).max(lc));
    }

    let period_f = period as f64;
    let mut atr = tr[..period].iter().sum::<f64>() / period_f;
    out[period] = atr;
    for (j, &t) in tr.iter().enumerate().skip(period) {
        atr = (atr * (period_f - 1.0) + t) / period_f;
        out[j + 1] = atr;
    }
    out
}

/// Most recent ATR value, `None` on insufficient or non-finite input.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    let series = atr_series(bars, period);
    let last = *series.last()?;
    if last.is_finite() {
        Some(last)
    } else {
        None
    }
}

/// ATR as a percentage of the latest close.
pub fn calculate_atr_pct(bars: &[Bar], period: usize) -> Option<f64> {
    let atr = calculate_atr(bars, period)?;
    let last_close = bars.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some((atr / last_close) * 100.0)
}
