// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA, upper/lower = SMA ± k*σ. Two derived metrics feed the
// feature frame and the regime classifier:
//   width    = (upper - lower) / middle * 100   (band width, percent)
//   position = (close - lower) / (upper - lower)  in [0, 1] on flat clamp
// =============================================================================

/// Latest-point band snapshot.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

/// Full band series aligned to the input (NaN until index `period - 1`).
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    /// Band width as a percent of the middle band.
    pub width_pct: Vec<f64>,
    /// Close position inside the band: 0 at the lower band, 1 at the upper.
    pub position: Vec<f64>,
}

/// Compute the Bollinger series over trailing windows of `period` closes.
pub fn bollinger_series(closes: &[f64], period: usize, num_std: f64) -> BollingerSeries {
    let n = closes.len();
    let nan = vec![f64::NAN; n];
    let mut out = BollingerSeries {
        upper: nan.clone(),
        middle: nan.clone(),
        lower: nan.clone(),
        width_pct: nan.clone(),
        position: nan,
    };
    if period == 0 || n < period {
        return out;
    }

    for i in (period - 1)..n {
        let window = &closes[i + 1 - period..=i];
        let middle = window.iter().sum::<f64>() / period as f64;
        if middle == 0.0 {
            continue;
        }
        let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();

        let upper = middle + num_std * std_dev;
        let lower = middle - num_std * std_dev;

        out.upper[i] = upper;
        out.middle[i] = middle;
        out.lower[i] = lower;
        out.width_pct[i] = (upper - lower) / middle * 100.0;
        out.position[i] = if upper > lower {
            (closes[i] - lower) / (upper - lower)
        } else {
            0.5 // flat window — price sits mid-band by definition
        };
    }

    out
}

/// Latest band values (used by the regime classifier).
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    let series = bollinger_series(closes, period, num_std);
    let i = closes.len().checked_sub(1)?;
    let middle = series.middle[i];
    if !middle.is_finite() {
        return None;
    }
    Some(BollingerResult {
        upper: series.upper[i],
        middle,
        lower: series.lower[i],
        width: series.width_pct[i],
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width > 0.0);
    }

    #[test]
    fn bollinger_insufficient_data() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(calculate_bollinger(&closes, 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_width_zero_position_centered() {
        let closes = vec![100.0; 20];
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.width.abs() < 1e-10);

        let series = bollinger_series(&closes, 20, 2.0);
        assert!((series.position[19] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn position_is_zero_to_one_inside_band() {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        closes.push(100.0);
        let series = bollinger_series(&closes, 20, 2.0);
        for &p in series.position.iter().filter(|p| !p.is_nan()) {
            assert!((-0.5..=1.5).contains(&p), "position {p} implausible");
        }
    }

    #[test]
    fn series_warmup_alignment() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let series = bollinger_series(&closes, 20, 2.0);
        assert!(series.middle[18].is_nan());
        assert!(series.middle[19].is_finite());
    }

    #[test]
    fn series_prefix_stable() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).cos() * 3.0).collect();
        let full = bollinger_series(&closes, 20, 2.0);
        let partial = bollinger_series(&closes[..40], 20, 2.0);
        for i in 0..40 {
            let (a, b) = (full.width_pct[i], partial.width_pct[i]);
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12);
        }
    }
}
