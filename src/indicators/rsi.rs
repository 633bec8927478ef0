// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Price deltas from consecutive closes.
// Step 2 — Seed average gain / loss with the SMA of the first `period` deltas.
// Step 3 — Wilder's smoothing:
//            avg = (prev_avg * (period - 1) + current) / period
// Step 4 — RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS)
//
// Thresholds: RSI > 70 => OVERBOUGHT, RSI < 30 => OVERSOLD.
// =============================================================================

/// RSI series aligned to `closes` (NaN until index `period`).
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for (j, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        out[j + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

/// Most recent RSI value, `None` on insufficient input.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    let series = rsi_series(closes, period);
    let last = *series.last()?;
    if last.is_finite() {
        Some(last)
    } else {
        None
    }
}

/// Convert average gain / loss into an RSI value in [0, 100].
///
/// - Both averages zero => 50.0 (no movement).
/// - Average loss zero  => 100.0 (only gains).
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}
