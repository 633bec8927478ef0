// =============================================================================
// Stochastic Oscillator (%K / %D)
// =============================================================================
//
//   %K = (close - lowest_low) / (highest_high - lowest_low) * 100
//        over the trailing `k_period` bars
//   %D = SMA(%K) over `d_period`
//
// A flat window (highest == lowest) yields a neutral 50.
// =============================================================================

use crate::indicators::ema::sma_series;
use crate::market_data::Bar;

/// Full stochastic series aligned to the input bars (NaN during warmup).
#[derive(Debug, Clone)]
pub struct StochasticSeries {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic_series(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticSeries {
    let n = bars.len();
    let mut out = StochasticSeries {
        k: vec![f64::NAN; n],
        d: vec![f64::NAN; n],
    };
    if k_period == 0 || d_period == 0 || n < k_period {
        return out;
    }

    for i in (k_period - 1)..n {
        let window = &bars[i + 1 - k_period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        out.k[i] = if highest > lowest {
            (bars[i].close - lowest) / (highest - lowest) * 100.0
        } else {
            50.0
        };
    }

    // %D over the valid %K segment.
    let valid = &out.k[(k_period - 1)..];
    let d_seg = sma_series(valid, d_period);
    for (j, &d) in d_seg.iter().enumerate() {
        out.d[k_period - 1 + j] = d;
    }

    out
}
