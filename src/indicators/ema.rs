// =============================================================================
// Moving averages — EMA and SMA
// =============================================================================
//
// EMA formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` values, so
// both series become available at index `period - 1` (NaN before that).
// =============================================================================

/// EMA series aligned to `values` (NaN until index `period - 1`).
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let multiplier = 2.0 / (period + 1) as f64;
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;

    let mut prev = seed;
    for i in period..n {
        let ema = values[i] * multiplier + prev * (1.0 - multiplier);
        out[i] = ema;
        prev = ema;
    }
    out
}

/// SMA series aligned to `values` (NaN until index `period - 1`).
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = window_sum / period as f64;
    for i in period..n {
        window_sum += values[i] - values[i - period];
        out[i] = window_sum / period as f64;
    }
    out
}

/// Most recent EMA value, `None` on insufficient input.
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    let series = ema_series(values, period);
    let last = *series.last()?;
    if last.is_finite() {
        Some(last)
    } else {
        None
    }
}
