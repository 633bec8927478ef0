// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   MACD line   = EMA(fast) - EMA(slow)
//   Signal line = EMA(signal) of the MACD line
//   Histogram   = MACD - Signal
//
// The MACD line becomes available at index `slow - 1`, the signal line and
// histogram `signal_period - 1` bars later.
// =============================================================================

use crate::indicators::ema::ema_series;

/// Full MACD series aligned to the input closes (NaN during warmup).
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = closes.len();
    let mut out = MacdSeries {
        macd: vec![f64::NAN; n],
        signal: vec![f64::NAN; n],
        histogram: vec![f64::NAN; n],
    };
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow || n < slow {
        return out;
    }

    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);

    for i in (slow - 1)..n {
        out.macd[i] = ema_fast[i] - ema_slow[i];
    }

    // EMA of the valid MACD segment, seeded with its first `signal_period` values.
    let valid = &out.macd[(slow - 1)..];
    let signal_seg = ema_series(valid, signal_period);
    for (j, &s) in signal_seg.iter().enumerate() {
        let i = slow - 1 + j;
        out.signal[i] = s;
        if s.is_finite() {
            out.histogram[i] = out.macd[i] - s;
        }
    }

    out
}

/// Standard 12/26/9 configuration.
pub fn macd_series_default(closes: &[f64]) -> MacdSeries {
    macd_series(closes, 12, 26, 9)
}
