// =============================================================================
// BBReversal — Bollinger band position reversal with RSI confirmation
// =============================================================================
//
// Price pinned at a band edge reverts more often than it continues, but only
// when momentum confirms: a lower-band touch needs an oversold-leaning RSI,
// an upper-band touch an overbought-leaning one.
// =============================================================================

use serde_json::json;

use crate::config::BbReversalConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct BbReversal {
    config: BbReversalConfig,
}

impl BbReversal {
    pub fn new(config: BbReversalConfig) -> Self {
        Self { config }
    }
}

impl Strategy for BbReversal {
    fn name(&self) -> &'static str {
        "bb_reversal"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(position), Some(rsi)) = (row.get("bb_position_20"), row.get("rsi_14")) else {
            return StrategySignal::hold(self.name());
        };

        let c = &self.config;

        let (side, deviation) = if position <= c.lower_threshold && rsi <= c.rsi_oversold {
            // Deviation grows as the close sinks below the lower band and RSI
            // digs deeper into oversold territory.
            let band_dev = (c.lower_threshold - position).max(0.0);
            let rsi_dev = (c.rsi_oversold - rsi) / c.rsi_oversold.max(1.0);
            (Side::Buy, band_dev + rsi_dev)
        } else if position >= c.upper_threshold && rsi >= c.rsi_overbought {
            let band_dev = (position - c.upper_threshold).max(0.0);
            let rsi_dev = (rsi - c.rsi_overbought) / (100.0 - c.rsi_overbought).max(1.0);
            (Side::Sell, band_dev + rsi_dev)
        } else {
            return StrategySignal::hold(self.name());
        };

        let confidence = scaled_confidence(c.base_confidence, deviation);
        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "bb_position": position,
            "rsi": rsi,
        }))
    }
}
