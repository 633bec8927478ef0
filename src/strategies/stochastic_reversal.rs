// =============================================================================
// StochasticReversal — %K/%D turn with RSI divergence and price-change filter
// =============================================================================
//
// Entry requires three things to line up:
//   1. Stochastic %K in the extreme zone and crossing back over %D;
//   2. RSI leaning the same (reversal) way;
//   3. The last bar not moving too fast — no knife-catching into momentum.
// =============================================================================

use serde_json::json;

use crate::config::StochasticReversalConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct StochasticReversal {
    config: StochasticReversalConfig,
}

impl StochasticReversal {
    pub fn new(config: StochasticReversalConfig) -> Self {
        Self { config }
    }
}

impl Strategy for StochasticReversal {
    fn name(&self) -> &'static str {
        "stochastic_reversal"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(k), Some(d), Some(rsi), Some(returns_1)) = (
            row.get("stoch_k"),
            row.get("stoch_d"),
            row.get("rsi_14"),
            row.get("returns_1"),
        ) else {
            return StrategySignal::hold(self.name());
        };

        let c = &self.config;

        // Price-change filter: skip bars still moving hard.
        if returns_1.abs() * 100.0 > c.max_abs_price_change_pct {
            return StrategySignal::hold(self.name());
        }

        let (side, deviation) = if k <= c.oversold && k > d && rsi <= c.rsi_oversold {
            let stoch_dev = (c.oversold - k) / c.oversold.max(1.0);
            let rsi_dev = (c.rsi_oversold - rsi) / c.rsi_oversold.max(1.0);
            (Side::Buy, stoch_dev + rsi_dev)
        } else if k >= c.overbought && k < d && rsi >= c.rsi_overbought {
            let stoch_dev = (k - c.overbought) / (100.0 - c.overbought).max(1.0);
            let rsi_dev = (rsi - c.rsi_overbought) / (100.0 - c.rsi_overbought).max(1.0);
            (Side::Sell, stoch_dev + rsi_dev)
        } else {
            return StrategySignal::hold(self.name());
        };

        let confidence = scaled_confidence(c.base_confidence, deviation);
        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "stoch_k": k,
            "stoch_d": d,
            "rsi": rsi,
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

    fn frame(k: f64, d: f64, rsi: f64, returns_1: f64) -> FeatureFrame {
        FeatureFrame::new(
            vec![
                "stoch_k".into(),
                "stoch_d".into(),
                "rsi_14".into(),
                "returns_1".into(),
            ],
            vec![Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()],
            vec![vec![k, d, rsi, returns_1]],
        )
        .unwrap()
    }

    fn strategy() -> StochasticReversal {
        StochasticReversal::new(StochasticReversalConfig::default())
    }

    #[test]
    fn oversold_upturn_buys() {
        // %K below oversold but turning up through %D, RSI weak, calm bar.
        let signal = strategy().evaluate(&frame(15.0, 12.0, 30.0, 0.001).latest().unwrap());
        assert_eq!(signal.side, Side::Buy);
    }

    #[test]
    fn overbought_downturn_sells() {
        let signal = strategy().evaluate(&frame(88.0, 92.0, 70.0, -0.001).latest().unwrap());
        assert_eq!(signal.side, Side::Sell);
    }

    #[test]
    fn fast_bar_blocks_entry() {
        // Same oversold setup, but the last bar moved 2% — filtered out.
        let signal = strategy().evaluate(&frame(15.0, 12.0, 30.0, -0.02).latest().unwrap());
        assert_eq!(signal.side, Side::Hold);
    }

    #[test]
    fn no_cross_holds() {
        // Oversold but %K still below %D (not turning yet).
        let signal = strategy().evaluate(&frame(15.0, 18.0, 30.0, 0.001).latest().unwrap());
        assert_eq!(signal.side, Side::Hold);
    }

    #[test]
    fn neutral_zone_holds() {
        let signal = strategy().evaluate(&frame(50.0, 48.0, 50.0, 0.0).latest().unwrap());
        assert_eq!(signal.side, Side::Hold);
        assert_eq!(signal.confidence, 0.0);
    }
}
