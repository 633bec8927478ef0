// =============================================================================
// Market Regime Classifier
// =============================================================================
//
// Classifies the current market into one of four regimes from the trailing
// window of primary bars. The regime switches strategy weights, risk
// parameters, and position limits downstream.
//
// Cascade (evaluated top-to-bottom; first match wins):
//
//   1. TRENDING        — ADX >= threshold AND |+DI - -DI| >= DI threshold
//   2. HIGH_VOLATILITY — realized per-bar volatility above the high threshold
//   3. TIGHT_RANGE     — BB width narrow AND window range fraction narrow
//   4. NORMAL_RANGE    — everything else
//
// All thresholds come from configuration. The reading is computed fresh every
// cycle and never cached across cycles.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegimeConfig;
use crate::indicators::adx::calculate_dmi;
use crate::indicators::bollinger::calculate_bollinger;
use crate::market_data::Bar;

/// Stable string keys used in configuration maps (strategy weights, R:R
/// tables, position limits).
pub const REGIME_KEYS: [&str; 4] = [
    "tight_range",
    "normal_range",
    "trending",
    "high_volatility",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TightRange,
    NormalRange,
    Trending,
    HighVolatility,
}

impl MarketRegime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TightRange => "tight_range",
            Self::NormalRange => "normal_range",
            Self::Trending => "trending",
            Self::HighVolatility => "high_volatility",
        }
    }

    /// Volatility bucket used to select the SL ATR multiplier.
    pub fn volatility_bucket(self) -> VolatilityBucket {
        match self {
            Self::TightRange => VolatilityBucket::Low,
            Self::NormalRange | Self::Trending => VolatilityBucket::Normal,
            Self::HighVolatility => VolatilityBucket::High,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
}

/// Complete regime reading with the contributing metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    /// How far the decisive metric sits beyond its threshold, in [0, 1].
    pub confidence: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub bb_width_pct: f64,
    pub realized_vol_pct: f64,
    pub range_fraction_pct: f64,
}

pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Classify the trailing window. Returns `None` when the window is too
    /// short for the underlying indicators.
    pub fn classify(&self, bars: &[Bar]) -> Option<RegimeReading> {
        let window = self.config.window;
        if bars.len() < window {
            return None;
        }
        let bars = &bars[bars.len() - window..];
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last_close = *closes.last()?;
        if last_close <= 0.0 {
            return None;
        }

        let dmi = calculate_dmi(bars, 14)?;
        let bb = calculate_bollinger(&closes, 20, 2.0)?;
        let realized_vol = realized_volatility_pct(&closes)?;

        let max_high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let min_low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range_fraction = (max_high - min_low) / last_close * 100.0;

        let (regime, confidence) = self.cascade(
            dmi.adx,
            (dmi.plus_di - dmi.minus_di).abs(),
            realized_vol,
            bb.width,
            range_fraction,
        );

        let reading = RegimeReading {
            regime,
            confidence,
            adx: dmi.adx,
            plus_di: dmi.plus_di,
            minus_di: dmi.minus_di,
            bb_width_pct: bb.width,
            realized_vol_pct: realized_vol,
            range_fraction_pct: range_fraction,
        };

        debug!(
            regime = %regime,
            adx = format!("{:.2}", dmi.adx),
            bbw = format!("{:.2}", bb.width),
            vol = format!("{:.3}", realized_vol),
            range = format!("{:.2}", range_fraction),
            confidence = format!("{:.2}", confidence),
            "regime classified"
        );

        Some(reading)
    }

    fn cascade(
        &self,
        adx: f64,
        di_diff: f64,
        realized_vol: f64,
        bb_width: f64,
        range_fraction: f64,
    ) -> (MarketRegime, f64) {
        let c = &self.config;

        // 1. TRENDING — directional persistence dominates everything else.
        if adx >= c.adx_trend_threshold && di_diff >= c.di_diff_threshold {
            let confidence = remap(
                adx,
                c.adx_trend_threshold,
                c.adx_trend_threshold * 2.0,
                0.60,
                1.0,
            );
            return (MarketRegime::Trending, confidence);
        }

        // 2. HIGH_VOLATILITY — expansion without direction.
        if realized_vol > c.high_vol_threshold {
            let confidence = remap(
                realized_vol,
                c.high_vol_threshold,
                c.high_vol_threshold * 2.0,
                0.65,
                1.0,
            );
            return (MarketRegime::HighVolatility, confidence);
        }

        // 3. TIGHT_RANGE — compression on both measures.
        if bb_width < c.bb_narrow_threshold && range_fraction < c.narrow_range_threshold {
            let bbw_conf = remap(
                bb_width,
                c.bb_narrow_threshold,
                c.bb_narrow_threshold * 0.25,
                0.50,
                1.0,
            );
            let range_conf = remap(
                range_fraction,
                c.narrow_range_threshold,
                c.narrow_range_threshold * 0.25,
                0.50,
                1.0,
            );
            return (MarketRegime::TightRange, (bbw_conf + range_conf) / 2.0);
        }

        // 4. NORMAL_RANGE — how comfortably ADX sits below the trend gate.
        let confidence = remap(adx, c.adx_trend_threshold, 0.0, 0.50, 0.90);
        (MarketRegime::NormalRange, confidence)
    }
}

/// Standard deviation of one-bar returns over the window, in percent.
fn realized_volatility_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                0.0
            } else {
                (w[1] - w[0]) / w[0]
            }
        })
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let vol = variance.sqrt() * 100.0;
    if vol.is_finite() {
        Some(vol)
    } else {
        None
    }
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range. Works regardless of input direction.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    out_lo + t.clamp(0.0, 1.0) * (out_hi - out_lo)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(RegimeConfig::default())
    }

    fn cascade_of(
        adx: f64,
        di_diff: f64,
        vol: f64,
        bbw: f64,
        range: f64,
    ) -> (MarketRegime, f64) {
        classifier().cascade(adx, di_diff, vol, bbw, range)
    }

    #[test]
    fn cascade_trending() {
        let (regime, conf) = cascade_of(35.0, 15.0, 0.2, 3.0, 4.0);
        assert_eq!(regime, MarketRegime::Trending);
        assert!(conf >= 0.6);
    }

    #[test]
    fn cascade_high_volatility() {
        let (regime, _) = cascade_of(15.0, 2.0, 1.2, 4.0, 6.0);
        assert_eq!(regime, MarketRegime::HighVolatility);
    }

    #[test]
    fn cascade_tight_range() {
        let (regime, conf) = cascade_of(12.0, 1.0, 0.1, 0.5, 0.4);
        assert_eq!(regime, MarketRegime::TightRange);
        assert!(conf > 0.5);
    }

    #[test]
    fn cascade_default_normal_range() {
        let (regime, _) = cascade_of(18.0, 2.0, 0.3, 2.0, 3.0);
        assert_eq!(regime, MarketRegime::NormalRange);
    }

    #[test]
    fn trending_beats_high_volatility() {
        // Both rules would fire; trending wins by cascade order.
        let (regime, _) = cascade_of(40.0, 20.0, 2.0, 8.0, 10.0);
        assert_eq!(regime, MarketRegime::Trending);
    }

    #[test]
    fn adx_without_di_differential_is_not_trending() {
        let (regime, _) = cascade_of(30.0, 1.0, 0.3, 2.0, 3.0);
        assert_ne!(regime, MarketRegime::Trending);
    }

    #[test]
    fn classify_trending_series() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 10000.0 * (1.0 + 0.004 * i as f64);
                let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i);
                Bar::new(ts, base, base * 1.001, base * 0.999, base * 1.0005, 5.0)
            })
            .collect();
        let reading = classifier().classify(&bars).unwrap();
        assert_eq!(reading.regime, MarketRegime::Trending);
        assert!(reading.adx >= 25.0);
    }

    #[test]
    fn classify_tight_oscillation_series() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 10000.0 * (1.0 + 0.001 * (i as f64 * 1.1).sin());
                let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i);
                Bar::new(ts, base, base * 1.0003, base * 0.9997, base, 5.0)
            })
            .collect();
        let reading = classifier().classify(&bars).unwrap();
        assert_eq!(reading.regime, MarketRegime::TightRange, "{reading:?}");
    }

    #[test]
    fn classify_insufficient_window_is_none() {
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i);
                Bar::new(ts, 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();
        assert!(classifier().classify(&bars).is_none());
    }

    #[test]
    fn volatility_buckets() {
        assert_eq!(
            MarketRegime::TightRange.volatility_bucket(),
            VolatilityBucket::Low
        );
        assert_eq!(
            MarketRegime::Trending.volatility_bucket(),
            VolatilityBucket::Normal
        );
        assert_eq!(
            MarketRegime::HighVolatility.volatility_bucket(),
            VolatilityBucket::High
        );
    }

    #[test]
    fn regime_keys_match_as_str() {
        let all = [
            MarketRegime::TightRange,
            MarketRegime::NormalRange,
            MarketRegime::Trending,
            MarketRegime::HighVolatility,
        ];
        for (regime, key) in all.iter().zip(REGIME_KEYS) {
            assert_eq!(regime.as_str(), key);
        }
    }

    #[test]
    fn remap_clamps_both_ends() {
        assert!((remap(0.5, 0.0, 1.0, 0.0, 10.0) - 5.0).abs() < 1e-10);
        assert!((remap(2.0, 0.0, 1.0, 0.0, 10.0) - 10.0).abs() < 1e-10);
        assert!((remap(-1.0, 0.0, 1.0, 0.0, 10.0) - 0.0).abs() < 1e-10);
    }
}
