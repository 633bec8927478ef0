// =============================================================================
// Rate of Change (ROC) — Momentum Indicator
// =============================================================================
//
//   ROC = ((close - close_n) / close_n) * 100
//
// Positive ROC indicates upward momentum; negative indicates downward.
// =============================================================================

/// ROC series aligned to `closes` (NaN until index `period`).
pub fn roc_series(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }

    for i in period..n {
        let prev = closes[i - period];
        out[i] = if prev == 0.0 {
            0.0
        } else {
            (closes[i] - prev) / prev * 100.0
        };
    }
    out
}

/// Most recent ROC value.
pub fn current_roc(closes: &[f64], period: usize) -> Option<f64> {
    let series = roc_series(closes, period);
    let last = *series.last()?;
    if last.is_finite() {
        Some(last)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roc_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let roc = roc_series(&closes, 14);
        // From 1 to 15: ROC = (15-1)/1 * 100 = 1400%
        assert!((roc[14] - 1400.0).abs() < 1e-10);
    }

    #[test]
    fn roc_insufficient_data() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(current_roc(&closes, 14).is_none());
    }

    #[test]
    fn roc_flat_is_zero() {
        let closes = vec![100.0; 30];
        assert!(current_roc(&closes, 14).unwrap().abs() < 1e-10);
    }
}
