// =============================================================================
// ATRBased — ATR-depletion reversal
// =============================================================================
//
// When the current bar has already consumed most of the average true range,
// continuation is statistically exhausted and a reversal against the bar
// direction becomes the primary signal. Consumption at or above the
// configured threshold (default 70 %) triggers.
// =============================================================================

use serde_json::json;

use crate::config::AtrBasedConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct AtrBased {
    config: AtrBasedConfig,
}

impl AtrBased {
    pub fn new(config: AtrBasedConfig) -> Self {
        Self { config }
    }
}

impl Strategy for AtrBased {
    fn name(&self) -> &'static str {
        "atr_based"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(true_range), Some(atr), Some(returns_1)) = (
            row.get("true_range"),
            row.get("atr_14"),
            row.get("returns_1"),
        ) else {
            return StrategySignal::hold(self.name());
        };

        if atr <= 0.0 {
            return StrategySignal::hold(self.name());
        }

        let consumption = true_range / atr;
        if consumption < self.config.consumption_threshold {
            return StrategySignal::hold(self.name());
        }

        // Reversal against the direction of the depleting bar.
        let side = if returns_1 > 0.0 {
            Side::Sell
        } else if returns_1 < 0.0 {
            Side::Buy
        } else {
            return StrategySignal::hold(self.name());
        };

        let deviation = consumption - self.config.consumption_threshold;
        let confidence = scaled_confidence(self.config.base_confidence, deviation);

        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "consumption": consumption,
            "threshold": self.config.consumption_threshold,
        }))
    }
}
