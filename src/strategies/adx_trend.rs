// =============================================================================
// ADXTrendStrength — trend-following on ADX with a DI cross
// =============================================================================
//
// Trend-type strategy: ADX at or above the threshold says a trend exists;
// the sign of the +DI / -DI differential says which way. Confidence scales
// with how far ADX sits beyond the threshold.
// =============================================================================

use serde_json::json;

use crate::config::AdxTrendConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct AdxTrendStrength {
    config: AdxTrendConfig,
}

impl AdxTrendStrength {
    pub fn new(config: AdxTrendConfig) -> Self {
        Self { config }
    }
}

impl Strategy for AdxTrendStrength {
    fn name(&self) -> &'static str {
        "adx_trend"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(adx), Some(plus_di), Some(minus_di)) = (
            row.get("adx_14"),
            row.get("plus_di_14"),
            row.get("minus_di_14"),
        ) else {
            return StrategySignal::hold(self.name());
        };

        let c = &self.config;

        if adx < c.adx_threshold {
            return StrategySignal::hold(self.name());
        }

        let di_diff = plus_di - minus_di;
        if di_diff.abs() < c.di_diff_threshold {
            return StrategySignal::hold(self.name());
        }

        let side = if di_diff > 0.0 { Side::Buy } else { Side::Sell };
        let deviation = (adx - c.adx_threshold) / c.adx_threshold.max(1.0);
        let confidence = scaled_confidence(c.base_confidence, deviation);

        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "adx": adx,
            "plus_di": plus_di,
            "minus_di": minus_di,
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureFrame;
    use chrono::{TimeZone, Utc};

    fn frame(adx: f64, plus_di: f64, minus_di: f64) -> FeatureFrame {
        FeatureFrame::new(
            vec!["adx_14".into(), "plus_di_14".into(), "minus_di_14".into()],
            vec![Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()],
            vec![vec![adx, plus_di, minus_di]],
        )
        .unwrap()
    }

    fn strategy() -> AdxTrendStrength {
        AdxTrendStrength::new(AdxTrendConfig::default())
    }

    #[test]
    fn strong_uptrend_buys() {
        let signal = strategy().evaluate(&frame(35.0, 30.0, 10.0).latest().unwrap());
        assert_eq!(signal.side, Side::Buy);
        assert!(signal.confidence > 0.5);
    }

    #[test]
    fn strong_downtrend_sells() {
        let signal = strategy().evaluate(&frame(35.0, 10.0, 30.0).latest().unwrap());
        assert_eq!(signal.side, Side::Sell);
    }

    #[test]
    fn weak_adx_holds() {
        let signal = strategy().evaluate(&frame(15.0, 30.0, 10.0).latest().unwrap());
        assert_eq!(signal.side, Side::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn small_di_differential_holds() {
        let signal = strategy().evaluate(&frame(35.0, 21.0, 19.0).latest().unwrap());
        assert_eq!(signal.side, Side::Hold);
    }

    #[test]
    fn stronger_adx_raises_confidence() {
        let moderate = strategy().evaluate(&frame(26.0, 30.0, 10.0).latest().unwrap());
        let strong = strategy().evaluate(&frame(50.0, 30.0, 10.0).latest().unwrap());
        assert!(strong.confidence > moderate.confidence);
    }
}
