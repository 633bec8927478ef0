// =============================================================================
// DonchianChannel — channel-edge reversal with RSI bonus
// =============================================================================
//
// A close at the channel extreme fades back toward the middle in ranging
// conditions. RSI stretched in the same direction adds a confidence bonus on
// top of the edge-distance term.
// =============================================================================

use serde_json::json;

use crate::config::DonchianChannelConfig;
use crate::features::FeatureRow;
use crate::strategies::{scaled_confidence, Strategy, StrategySignal};
use crate::types::Side;

pub struct DonchianChannel {
    config: DonchianChannelConfig,
}

impl DonchianChannel {
    pub fn new(config: DonchianChannelConfig) -> Self {
        Self { config }
    }
}

impl Strategy for DonchianChannel {
    fn name(&self) -> &'static str {
        "donchian_channel"
    }

    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal {
        let (Some(position), Some(rsi)) = (row.get("channel_position_20"), row.get("rsi_14"))
        else {
            return StrategySignal::hold(self.name());
        };

        let c = &self.config;

        let (side, mut deviation) = if position <= c.lower_threshold {
            (Side::Buy, (c.lower_threshold - position).max(0.0))
        } else if position >= c.upper_threshold {
            (Side::Sell, (position - c.upper_threshold).max(0.0))
        } else {
            return StrategySignal::hold(self.name());
        };

        // RSI bonus when momentum is stretched the same way.
        let rsi_bonus = match side {
            Side::Buy if rsi <= c.rsi_bonus_oversold => {
                (c.rsi_bonus_oversold - rsi) / c.rsi_bonus_oversold.max(1.0)
            }
            Side::Sell if rsi >= c.rsi_bonus_overbought => {
                (rsi - c.rsi_bonus_overbought) / (100.0 - c.rsi_bonus_overbought).max(1.0)
            }
            _ => 0.0,
        };
        deviation += rsi_bonus;

        let confidence = scaled_confidence(c.base_confidence, deviation);
        StrategySignal::new(self.name(), side, confidence).with_metadata(json!({
            "channel_position": position,
            "rsi": rsi,
            "rsi_bonus": rsi_bonus,
        }))
    }
}
