// =============================================================================
// Rule-based strategies — a closed, registered set of six
// =============================================================================
//
// Each strategy is a pure function of the latest feature row and its
// configured thresholds. Preconditions failing for any reason — including a
// missing feature — yields `HOLD` with confidence 0.0, never an error.
//
// All strategies compute confidence through the same template: a configured
// base value scaled by a deviation-from-threshold term, clipped to
// [0.2, 0.8].
// =============================================================================

pub mod adx_trend;
pub mod atr_based;
pub mod bb_reversal;
pub mod donchian_channel;
pub mod macd_ema;
pub mod manager;
pub mod stochastic_reversal;

use serde::Serialize;

use crate::config::StrategiesConfig;
use crate::features::FeatureRow;
use crate::types::Side;

pub use manager::{StrategyManager, StrategyProposal};

/// The closed strategy registry, in canonical order. The strategy-signal
/// feature columns follow this order as `sig_<name>`.
pub const STRATEGY_NAMES: [&str; 6] = [
    "atr_based",
    "bb_reversal",
    "stochastic_reversal",
    "donchian_channel",
    "macd_ema",
    "adx_trend",
];

/// Output of one strategy for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    pub strategy: &'static str,
    pub side: Side,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

impl StrategySignal {
    /// The neutral signal every strategy falls back to.
    pub fn hold(strategy: &'static str) -> Self {
        Self {
            strategy,
            side: Side::Hold,
            confidence: 0.0,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn new(strategy: &'static str, side: Side, confidence: f64) -> Self {
        Self {
            strategy,
            side,
            confidence,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate the latest feature row. Must not fail: missing preconditions
    /// produce `HOLD` with confidence 0.0.
    fn evaluate(&self, row: &FeatureRow<'_>) -> StrategySignal;
}

/// Shared confidence template: `base * (1 + deviation)`, clipped to [0.2, 0.8].
/// `deviation` measures how far past its trigger threshold the decisive metric
/// sits (0 = exactly at threshold).
pub fn scaled_confidence(base: f64, deviation: f64) -> f64 {
    (base * (1.0 + deviation.max(0.0))).clamp(0.2, 0.8)
}

/// Build the full strategy set from configuration. The set is closed: these
/// six, in this order, and nothing else.
pub fn build_strategies(config: &StrategiesConfig) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(atr_based::AtrBased::new(config.atr_based.clone())),
        Box::new(bb_reversal::BbReversal::new(config.bb_reversal.clone())),
        Box::new(stochastic_reversal::StochasticReversal::new(
            config.stochastic_reversal.clone(),
        )),
        Box::new(donchian_channel::DonchianChannel::new(
            config.donchian_channel.clone(),
        )),
        Box::new(macd_ema::MacdEmaCrossover::new(config.macd_ema.clone())),
        Box::new(adx_trend::AdxTrendStrength::new(config.adx_trend.clone())),
    ]
}
