// =============================================================================
// FeatureGenerator — the deterministic 55-column feature pipeline
// =============================================================================
//
// Guarantees:
//   (i)   deterministic — identical input bars yield an identical frame;
//   (ii)  no future leak — every value in row i depends only on bars <= i,
//         including the higher-timeframe join, which uses the last 4h bar
//         *closed* at or before the 15m row's close;
//   (iii) NaN-free output — warmup rows are dropped, and any NaN surviving
//         past warmup is a hard error;
//   (iv)  column order identical to FeatureManager's canonical schema.
//
// The 6 strategy-signal columns are produced by running the registered
// strategies over each completed market-feature row, so training and
// inference see byte-identical signal encodings.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::FeatureError;
use crate::features::frame::FeatureFrame;
use crate::features::manager::FeatureManager;
use crate::indicators::adx::dmi_series;
use crate::indicators::atr::{atr_series, true_range_series};
use crate::indicators::bollinger::bollinger_series;
use crate::indicators::donchian::donchian_series;
use crate::indicators::ema::{ema_series, sma_series};
use crate::indicators::macd::macd_series_default;
use crate::indicators::roc::roc_series;
use crate::indicators::rsi::rsi_series;
use crate::indicators::stochastic::stochastic_series;
use crate::market_data::{BarSeries, Timeframe};
use crate::strategies::Strategy;

// Fixed parameters of the feature definitions themselves. These are part of
// each feature's identity (like the 14 in rsi_14), not tunables.
const ROLLING_WINDOW: usize = 20;
const VOL_REGIME_LOW_PCT: f64 = 0.3;
const VOL_REGIME_HIGH_PCT: f64 = 0.8;
const NEAR_EDGE_BAND: f64 = 0.1;

pub struct FeatureGenerator {
    manager: Arc<FeatureManager>,
    strategies: Arc<Vec<Box<dyn Strategy>>>,
    min_primary_bars: usize,
}

impl FeatureGenerator {
    pub fn new(
        manager: Arc<FeatureManager>,
        strategies: Arc<Vec<Box<dyn Strategy>>>,
        min_primary_bars: usize,
    ) -> Self {
        Self {
            manager,
            strategies,
            min_primary_bars,
        }
    }

    /// Generate the full feature frame from the primary series and the
    /// aligned supporting series.
    pub fn generate(
        &self,
        primary: &BarSeries,
        supporting: &BarSeries,
    ) -> Result<FeatureFrame, FeatureError> {
        let bars = primary.bars();
        let n = bars.len();
        if n < self.min_primary_bars {
            return Err(FeatureError::InsufficientData {
                have: n,
                need: self.min_primary_bars,
            });
        }

        let columns = self.market_columns(primary, supporting);

        // Assemble market values in canonical order, looking every schema
        // column up in the computed set. A schema column the generator does
        // not produce is a schema drift bug, not a data problem.
        let market_names = self.manager.market_feature_names();
        let mut market_series: Vec<&Vec<f64>> = Vec::with_capacity(market_names.len());
        for name in market_names {
            let series = columns.get(name.as_str()).ok_or_else(|| {
                FeatureError::SchemaMismatch(format!(
                    "generator does not produce schema column '{name}'"
                ))
            })?;
            market_series.push(series);
        }

        // Warmup boundary: first row where every market column is finite.
        let warmup = (0..n)
            .find(|&i| market_series.iter().all(|s| s[i].is_finite()))
            .ok_or(FeatureError::InsufficientData {
                have: n,
                need: self.min_primary_bars,
            })?;

        let mut timestamps = Vec::with_capacity(n - warmup);
        let mut market_rows = Vec::with_capacity(n - warmup);
        for i in warmup..n {
            let mut row = Vec::with_capacity(market_series.len());
            for (series, name) in market_series.iter().zip(market_names) {
                let v = series[i];
                if !v.is_finite() {
                    return Err(FeatureError::NonFinite {
                        column: name.clone(),
                        row: i - warmup,
                    });
                }
                row.push(v);
            }
            timestamps.push(bars[i].ts);
            market_rows.push(row);
        }

        // Strategy-signal columns: evaluate the registered strategies on the
        // completed market rows.
        let market_frame = FeatureFrame::new(
            market_names.to_vec(),
            timestamps.clone(),
            market_rows.clone(),
        )?;

        let mut rows = market_rows;
        for (idx, row) in rows.iter_mut().enumerate() {
            let view = market_frame
                .row(idx)
                .expect("market frame row indices align with rows");
            for strategy in self.strategies.iter() {
                let signal = strategy.evaluate(&view);
                row.push(signal.side.direction());
            }
        }

        let frame = FeatureFrame::new(self.manager.feature_names().to_vec(), timestamps, rows)?;

        let report = self.manager.validate(&frame);
        if !report.ok {
            return Err(FeatureError::SchemaMismatch(format!(
                "generated frame failed schema validation: {report:?}"
            )));
        }

        debug!(
            rows = frame.len(),
            warmup_dropped = warmup,
            columns = frame.columns().len(),
            "feature frame generated"
        );

        Ok(frame)
    }

    /// Compute every market feature as a full-length series (NaN = warmup).
    fn market_columns(
        &self,
        primary: &BarSeries,
        supporting: &BarSeries,
    ) -> HashMap<&'static str, Vec<f64>> {
        let bars = primary.bars();
        let n = bars.len();

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let mut cols: HashMap<&'static str, Vec<f64>> = HashMap::new();

        // --- basic ---------------------------------------------------------
        cols.insert("close", closes.clone());
        cols.insert("open", opens);
        cols.insert("high", highs.clone());
        cols.insert("low", lows.clone());
        cols.insert("returns_1", lagged_returns(&closes, 1));
        cols.insert("returns_2", lagged_returns(&closes, 2));
        cols.insert("returns_3", lagged_returns(&closes, 3));
        cols.insert("returns_5", lagged_returns(&closes, 5));
        cols.insert("returns_10", lagged_returns(&closes, 10));
        cols.insert("log_returns_1", log_returns(&closes));

        // --- momentum ------------------------------------------------------
        cols.insert("rsi_14", rsi_series(&closes, 14));
        cols.insert("rsi_7", rsi_series(&closes, 7));
        let macd = macd_series_default(&closes);
        cols.insert("macd", macd.macd);
        cols.insert("macd_signal", macd.signal);
        cols.insert("macd_hist", macd.histogram);
        let stoch = stochastic_series(bars, 14, 3);
        cols.insert("stoch_k", stoch.k);
        cols.insert("stoch_d", stoch.d);
        cols.insert("roc_10", roc_series(&closes, 10));
        cols.insert("momentum_14", lagged_difference(&closes, 14));

        // --- volatility ----------------------------------------------------
        let atr = atr_series(bars, 14);
        let atr_pct: Vec<f64> = atr
            .iter()
            .zip(&closes)
            .map(|(a, c)| if *c > 0.0 { a / c * 100.0 } else { f64::NAN })
            .collect();
        cols.insert("atr_14", atr.clone());
        cols.insert("atr_pct", atr_pct.clone());
        let returns_1 = lagged_returns(&closes, 1);
        cols.insert(
            "realized_vol_20",
            rolling_std(&returns_1, ROLLING_WINDOW)
                .into_iter()
                .map(|v| v * 100.0)
                .collect(),
        );
        cols.insert(
            "high_low_range",
            bars.iter()
                .map(|b| {
                    if b.close > 0.0 {
                        (b.high - b.low) / b.close * 100.0
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
        );
        cols.insert("true_range", true_range_series(bars));

        // --- trend ---------------------------------------------------------
        let ema_9 = ema_series(&closes, 9);
        let ema_20 = ema_series(&closes, 20);
        let ema_50 = ema_series(&closes, 50);
        cols.insert("ema_9", ema_9);
        cols.insert("ema_20", ema_20.clone());
        cols.insert("ema_50", ema_50.clone());
        cols.insert("sma_20", sma_series(&closes, ROLLING_WINDOW));
        cols.insert("close_over_ema20", ratio_series(&closes, &ema_20));
        cols.insert("ema20_over_ema50", ratio_series(&ema_20, &ema_50));
        let (htf_alignment, htf_trend) = self.htf_columns(primary, supporting);
        cols.insert("htf_ema_alignment", htf_alignment);
        cols.insert("htf_trend", htf_trend);

        // --- volume --------------------------------------------------------
        cols.insert("volume", volumes.clone());
        let vol_sma = sma_series(&volumes, ROLLING_WINDOW);
        cols.insert(
            "volume_ratio_20",
            volumes
                .iter()
                .zip(&vol_sma)
                .map(|(v, m)| {
                    if !m.is_finite() {
                        f64::NAN
                    } else if *m > 0.0 {
                        v / m
                    } else {
                        1.0
                    }
                })
                .collect(),
        );
        cols.insert("volume_zscore_20", rolling_zscore(&volumes, ROLLING_WINDOW));

        // --- breakout ------------------------------------------------------
        let donchian = donchian_series(bars, ROLLING_WINDOW);
        cols.insert("donchian_high_20", donchian.upper.clone());
        cols.insert("donchian_low_20", donchian.lower.clone());
        cols.insert("channel_position_20", donchian.position.clone());
        cols.insert(
            "breakout_strength",
            breakout_strength(bars, &atr, ROLLING_WINDOW),
        );
        cols.insert(
            "near_high_20",
            donchian
                .position
                .iter()
                .map(|p| {
                    if p.is_finite() {
                        f64::from(u8::from(*p >= 1.0 - NEAR_EDGE_BAND))
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
        );
        cols.insert(
            "near_low_20",
            donchian
                .position
                .iter()
                .map(|p| {
                    if p.is_finite() {
                        f64::from(u8::from(*p <= NEAR_EDGE_BAND))
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
        );

        // --- regime --------------------------------------------------------
        let dmi = dmi_series(bars, 14);
        cols.insert("adx_14", dmi.adx.clone());
        cols.insert("plus_di_14", dmi.plus_di.clone());
        cols.insert("minus_di_14", dmi.minus_di.clone());
        let bb = bollinger_series(&closes, ROLLING_WINDOW, 2.0);
        cols.insert("bb_width_20", bb.width_pct);
        cols.insert("bb_position_20", bb.position);
        cols.insert(
            "range_fraction_20",
            donchian
                .upper
                .iter()
                .zip(&donchian.lower)
                .zip(&closes)
                .map(|((u, l), c)| {
                    if u.is_finite() && l.is_finite() && *c > 0.0 {
                        (u - l) / c * 100.0
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
        );
        cols.insert(
            "volatility_regime",
            atr_pct
                .iter()
                .map(|p| {
                    if !p.is_finite() {
                        f64::NAN
                    } else if *p < VOL_REGIME_LOW_PCT {
                        0.0
                    } else if *p < VOL_REGIME_HIGH_PCT {
                        1.0
                    } else {
                        2.0
                    }
                })
                .collect(),
        );

        let ema_20 = &cols["ema_20"];
        let ema_50 = &cols["ema_50"];
        let mut trend_strength = Vec::with_capacity(n);
        for i in 0..n {
            let (adx, pdi, mdi) = (dmi.adx[i], dmi.plus_di[i], dmi.minus_di[i]);
            let (e20, e50, c) = (ema_20[i], ema_50[i], closes[i]);
            if !(adx.is_finite() && pdi.is_finite() && mdi.is_finite() && e20.is_finite() && e50.is_finite()) {
                trend_strength.push(f64::NAN);
                continue;
            }
            trend_strength.push(composite_trend_strength(adx, pdi, mdi, c, e20, e50));
        }
        cols.insert("trend_strength", trend_strength);

        cols
    }

    /// Higher-timeframe columns via an as-of join: each primary row uses the
    /// last supporting bar whose close time is at or before the primary
    /// row's close time.
    fn htf_columns(&self, primary: &BarSeries, supporting: &BarSeries) -> (Vec<f64>, Vec<f64>) {
        let bars = primary.bars();
        let sup = supporting.bars();
        let n = bars.len();

        let mut alignment = vec![f64::NAN; n];
        let mut trend = vec![f64::NAN; n];
        if sup.is_empty() {
            return (alignment, trend);
        }

        let sup_closes: Vec<f64> = sup.iter().map(|b| b.close).collect();
        let ema_20 = ema_series(&sup_closes, 20);
        let ema_50 = ema_series(&sup_closes, 50);

        let mut j: usize = 0;
        let mut matched: Option<usize> = None;
        for (i, bar) in bars.iter().enumerate() {
            let decision_time = bar.close_time(primary.timeframe());
            while j < sup.len() && sup[j].close_time(Timeframe::H4) <= decision_time {
                matched = Some(j);
                j += 1;
            }
            let Some(m) = matched else { continue };
            let (e20, e50) = (ema_20[m], ema_50[m]);
            if !(e20.is_finite() && e50.is_finite()) {
                continue;
            }
            let c = sup_closes[m];

            alignment[i] = if c > e20 && e20 > e50 {
                1.0
            } else if c < e20 && e20 < e50 {
                -1.0
            } else {
                0.0
            };
            trend[i] = if e20 > 0.0 { (c - e20) / e20 } else { 0.0 };
        }

        (alignment, trend)
    }
}

/// Composite trend-strength score in [0, 1]: weighted ADX, DI differential,
/// and EMA-stack alignment. Shared with the cooldown bypass check.
pub fn composite_trend_strength(
    adx: f64,
    plus_di: f64,
    minus_di: f64,
    close: f64,
    ema_20: f64,
    ema_50: f64,
) -> f64 {
    let adx_term = (adx / 50.0).clamp(0.0, 1.0);
    let di_term = ((plus_di - minus_di).abs() / 25.0).clamp(0.0, 1.0);
    let aligned = (close > ema_20 && ema_20 > ema_50) || (close < ema_20 && ema_20 < ema_50);
    0.4 * adx_term + 0.3 * di_term + 0.3 * f64::from(u8::from(aligned))
}

// =============================================================================
// Series helpers
// =============================================================================

fn lagged_returns(closes: &[f64], lag: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    for i in lag..n {
        let prev = closes[i - lag];
        out[i] = if prev > 0.0 {
            (closes[i] - prev) / prev
        } else {
            f64::NAN
        };
    }
    out
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    for i in 1..n {
        let prev = closes[i - 1];
        out[i] = if prev > 0.0 && closes[i] > 0.0 {
            (closes[i] / prev).ln()
        } else {
            f64::NAN
        };
    }
    out
}

fn lagged_difference(closes: &[f64], lag: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    for i in lag..n {
        out[i] = closes[i] - closes[i - lag];
    }
    out
}

fn ratio_series(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(a, b)| {
            if a.is_finite() && b.is_finite() && *b != 0.0 {
                a / b
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Rolling population standard deviation over trailing windows, NaN while any
/// window element is NaN.
fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let mean = slice.iter().sum::<f64>() / window as f64;
        let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
        out[i] = variance.sqrt();
    }
    out
}

fn rolling_zscore(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let mean = slice.iter().sum::<f64>() / window as f64;
        let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
        let std = variance.sqrt();
        out[i] = if std > 0.0 { (values[i] - mean) / std } else { 0.0 };
    }
    out
}

/// Signed distance of the close beyond the *previous* window's channel,
/// normalized by ATR. Zero while the close stays inside the prior channel.
fn breakout_strength(
    bars: &[crate::market_data::Bar],
    atr: &[f64],
    window: usize,
) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    for i in window..n {
        if !atr[i].is_finite() || atr[i] <= 0.0 {
            continue;
        }
        let prev = &bars[i - window..i];
        let upper = prev.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lower = prev.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let c = bars[i].close;
        out[i] = if c > upper {
            (c - upper) / atr[i]
        } else if c < lower {
            (c - lower) / atr[i]
        } else {
            0.0
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
    use crate::config::StrategiesConfig;
    use crate::market_data::Bar;
    use crate::strategies::build_strategies;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn primary_series(n: usize) -> BarSeries {
        let bars: Vec<Bar> = (0..n)
            .map(|i| {
                let base = 10000.0 * (1.0 + 0.002 * (i as f64 * 0.17).sin());
                Bar::new(
                    start() + Duration::minutes(15 * i as i64),
                    base,
                    base * 1.0015,
                    base * 0.9985,
                    base * (1.0 + 0.0005 * (i as f64 * 0.13).cos()),
                    5.0 + (i as f64 * 0.29).sin().abs(),
                )
            })
            .collect();
        BarSeries::new(Timeframe::M15, bars).unwrap()
    }

    fn supporting_series(n: usize) -> BarSeries {
        // Starts well before the primary window so EMA-50 on 4h is warm.
        let first = start() - Duration::hours(4 * (n as i64 - 20));
        let bars: Vec<Bar> = (0..n)
            .map(|i| {
                let base = 10000.0 * (1.0 + 0.003 * (i as f64 * 0.11).sin());
                Bar::new(
                    first + Duration::hours(4 * i as i64),
                    base,
                    base * 1.004,
                    base * 0.996,
                    base * 1.001,
                    40.0,
                )
            })
            .collect();
        BarSeries::new(Timeframe::H4, bars).unwrap()
    }

    fn generator() -> FeatureGenerator {
        let path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/feature_schema.json");
        let manager = Arc::new(FeatureManager::from_schema_file(path).unwrap());
        let strategies = Arc::new(build_strategies(&StrategiesConfig::default()));
        FeatureGenerator::new(manager, strategies, 200)
    }

    #[test]
    fn generated_frame_is_finite_and_schema_ordered() {
        let gen = generator();
        let frame = gen
            .generate(&primary_series(250), &supporting_series(120))
            .unwrap();

        assert!(!frame.is_empty());
        assert_eq!(frame.columns().len(), 55);

        // Bytewise column order equals the canonical names; all values finite.
        let manager_path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/feature_schema.json");
        let manager = FeatureManager::from_schema_file(manager_path).unwrap();
        assert_eq!(frame.columns(), manager.feature_names());

        for i in 0..frame.len() {
            let row = frame.row(i).unwrap();
            for (col, v) in frame.columns().iter().zip(row.values()) {
                assert!(v.is_finite(), "non-finite {col} at row {i}");
            }
        }
    }

    #[test]
    fn prefix_rows_are_identical_to_full_series_rows() {
        // No look-ahead: a prefix of the history must reproduce the same rows.
        let gen = generator();
        let primary = primary_series(250);
        let supporting = supporting_series(120);

        let full = gen.generate(&primary, &supporting).unwrap();
        let partial = gen.generate(&primary.prefix(230), &supporting).unwrap();

        assert!(partial.len() > 0);
        for i in 0..partial.len() {
            let a = partial.row(i).unwrap();
            let b = full.row(i).unwrap();
            assert_eq!(a.timestamp(), b.timestamp());
            for (col, (x, y)) in full.columns().iter().zip(a.values().iter().zip(b.values())) {
                assert!(
                    (x - y).abs() < 1e-12,
                    "look-ahead leak in {col} at row {i}: {x} vs {y}"
                );
            }
        }
    }

    #[test]
    fn strategy_columns_are_ternary() {
        let gen = generator();
        let frame = gen
            .generate(&primary_series(250), &supporting_series(120))
            .unwrap();
        for col in [
            "sig_atr_based",
            "sig_bb_reversal",
            "sig_stochastic_reversal",
            "sig_donchian_channel",
            "sig_macd_ema",
            "sig_adx_trend",
        ] {
            for i in 0..frame.len() {
                let v = frame.value(i, col).unwrap();
                assert!(
                    v == -1.0 || v == 0.0 || v == 1.0,
                    "{col} row {i} not ternary: {v}"
                );
            }
        }
    }

    #[test]
    fn insufficient_bars_rejected() {
        let gen = generator();
        let err = gen
            .generate(&primary_series(100), &supporting_series(120))
            .unwrap_err();
        assert!(matches!(err, FeatureError::InsufficientData { .. }));
    }

    #[test]
    fn htf_alignment_is_ternary_encoded() {
        let gen = generator();
        let frame = gen
            .generate(&primary_series(250), &supporting_series(120))
            .unwrap();
        for i in 0..frame.len() {
            let v = frame.value(i, "htf_ema_alignment").unwrap();
            assert!(v == -1.0 || v == 0.0 || v == 1.0);
        }
    }

    #[test]
    fn trend_strength_in_unit_interval() {
        let gen = generator();
        let frame = gen
            .generate(&primary_series(250), &supporting_series(120))
            .unwrap();
        for i in 0..frame.len() {
            let v = frame.value(i, "trend_strength").unwrap();
            assert!((0.0..=1.0).contains(&v), "trend_strength {v} out of range");
        }
    }

    #[test]
    fn composite_strength_strong_trend_clears_bypass() {
        // ADX 35+, DI aligned, EMA aligned — the cooldown-bypass scenario.
        let s = composite_trend_strength(35.0, 30.0, 8.0, 101.0, 100.0, 99.0);
        assert!(s >= 0.7, "expected >= 0.7, got {s}");

        // Weak trend stays below the bypass threshold.
        let w = composite_trend_strength(15.0, 18.0, 16.0, 100.0, 101.0, 99.0);
        assert!(w < 0.7, "expected < 0.7, got {w}");
    }
}
