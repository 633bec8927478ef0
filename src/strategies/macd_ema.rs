// =============================================================================
// MACDEMACrossover — MACD state gated by EMA stack alignment
// =============================================================================
//
// Trend-type strategy: a bullish MACD (line above signal) only counts when
// the EMA stack confirms — close above EMA20 and EMA20 above EMA50. The
// mirror condition produces a sell. Confidence scales with the histogram
// magnitude normalized by ATR, so a fresh, small cross starts near base
// confidence and a widening one ramps up.
// =============================================================================

use serde_json::json;

use crate::config::MacdEmaConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct MacdEmaCrossover {
    config: MacdEmaConfig,
}

impl MacdEmaCrossover {
    pub fn new(config: MacdEmaConfig) -> Self {
        Self { config }
    }
}

impl Strategy for MacdEmaCrossover {
    fn name(&self) -> &'static str {
        "macd_ema"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(hist), Some(close_over_ema20), Some(ema20_over_ema50), Some(atr)) = (
            row.get("macd_hist"),
            row.get("close_over_ema20"),
            row.get("ema20_over_ema50"),
            row.get("atr_14"),
        ) else {
            return StrategySignal::hold(self.name());
        };

        if atr <= 0.0 {
            return StrategySignal::hold(self.name());
        }

        let bullish_stack = close_over_ema20 > 1.0 && ema20_over_ema50 > 1.0;
        let bearish_stack = close_over_ema20 < 1.0 && ema20_over_ema50 < 1.0;

        let side = if hist > 0.0 && bullish_stack {
            Side::Buy
        } else if hist < 0.0 && bearish_stack {
            Side::Sell
        } else {
            return StrategySignal::hold(self.name());
        };

        let deviation = hist.abs() / atr;
        let confidence = scaled_confidence(self.config.base_confidence, deviation);

        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "macd_hist": hist,
            "close_over_ema20": close_over_ema20,
            "ema20_over_ema50": ema20_over_ema50,
        }))
    }
}
