// =============================================================================
// SignalIntegrator — merge the strategy vote and the ML prediction
// =============================================================================
//
// Rules, in order:
//   1. ML confidence below `min_ml_confidence` → the prediction is ignored
//      and the strategy proposal passes through unchanged.
//   2. Agreement → weighted blend of both confidences times the agreement
//      bonus.
//   3. Disagreement with ML at or above `high_confidence_threshold` → the
//      decision swings to the ML side, penalized.
//   4. Other disagreement → stay with the strategy side, penalized.
//   5. A directional result below `hold_conversion_threshold` is forced to
//      HOLD.
//
// Every contributing term is recorded for post-mortem analysis.
// =============================================================================

use serde::Serialize;
use tracing::info;

use crate::config::MlConfig;
use crate::ml::{DegradationLevel, Prediction};
use crate::strategies::StrategyProposal;
use crate::types::Side;

/// Breakdown of how the integrated decision was produced.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationComponents {
    pub strategy_side: Side,
    pub strategy_confidence: f64,
    pub ml_side: Side,
    pub ml_confidence: f64,
    pub ml_level: DegradationLevel,
    pub ml_used: bool,
    pub agreement: bool,
    pub swung_to_ml: bool,
    pub applied_multiplier: f64,
    pub forced_hold: bool,
    pub strategy_weight: f64,
    pub ml_weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegratedSignal {
    pub side: Side,
    pub confidence: f64,
    pub components: IntegrationComponents,
}

pub struct SignalIntegrator {
    config: MlConfig,
}

impl SignalIntegrator {
    pub fn new(config: MlConfig) -> Self {
        Self { config }
    }

    pub fn integrate(
        &self,
        proposal: &StrategyProposal,
        prediction: &Prediction,
    ) -> IntegratedSignal {
        let c = &self.config;
        let s_side = proposal.side;
        let s_conf = proposal.confidence;
        let m_side = prediction.predicted;
        let m_conf = prediction.confidence;

        let ml_used = m_conf >= c.min_ml_confidence;

        let mut components = IntegrationComponents {
            strategy_side: s_side,
            strategy_confidence: s_conf,
            ml_side: m_side,
            ml_confidence: m_conf,
            ml_level: prediction.level,
            ml_used,
            agreement: false,
            swung_to_ml: false,
            applied_multiplier: 1.0,
            forced_hold: false,
            strategy_weight: c.strategy_weight,
            ml_weight: c.ml_weight,
        };

        let (mut side, mut confidence) = if !ml_used {
            (s_side, s_conf)
        } else if s_side == m_side {
            components.agreement = true;
            components.applied_multiplier = c.agreement_bonus;
            let blended = c.strategy_weight * s_conf + c.ml_weight * m_conf;
            (s_side, (blended * c.agreement_bonus).clamp(0.0, 1.0))
        } else if m_conf >= c.high_confidence_threshold {
            components.swung_to_ml = true;
            components.applied_multiplier = c.disagreement_penalty;
            (m_side, (m_conf * c.disagreement_penalty).clamp(0.0, 1.0))
        } else {
            components.applied_multiplier = c.disagreement_penalty;
            (s_side, (s_conf * c.disagreement_penalty).clamp(0.0, 1.0))
        };

        if side.is_directional() && confidence < c.hold_conversion_threshold {
            components.forced_hold = true;
            side = Side::Hold;
        }

        if confidence < 0.0 {
            confidence = 0.0;
        }

        info!(
            side = %side,
            confidence = format!("{:.3}", confidence),
            strategy_side = %s_side,
            strategy_confidence = format!("{:.3}", s_conf),
            ml_side = %m_side,
            ml_confidence = format!("{:.3}", m_conf),
            ml_used,
            agreement = components.agreement,
            swung_to_ml = components.swung_to_ml,
            forced_hold = components.forced_hold,
            "signals integrated"
        );

        IntegratedSignal {
            side,
            confidence,
            components,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ClassProbs;
    use crate::regime::MarketRegime;

    fn proposal(side: Side, confidence: f64) -> StrategyProposal {
        StrategyProposal {
            side,
            confidence,
            buy_score: 0.0,
            sell_score: 0.0,
            hold_score: 0.0,
            regime: MarketRegime::NormalRange,
            contributions: Vec::new(),
        }
    }

    fn prediction(side: Side, confidence: f64) -> Prediction {
        let mut probabilities: ClassProbs = [(1.0 - confidence) / 2.0; 3];
        probabilities[side.class_index()] = confidence;
        Prediction {
            probabilities,
            predicted: side,
            confidence,
            used_features: 55,
            level: DegradationLevel::Full,
        }
    }

    fn integrator() -> SignalIntegrator {
        SignalIntegrator::new(MlConfig::default())
    }

    #[test]
    fn agreement_applies_bonus() {
        let out = integrator().integrate(&proposal(Side::Buy, 0.6), &prediction(Side::Buy, 0.6));
        assert_eq!(out.side, Side::Buy);
        let expected = (0.7 * 0.6 + 0.3 * 0.6) * 1.1;
        assert!((out.confidence - expected).abs() < 1e-9);
        assert!(out.components.agreement);
        assert!(!out.components.forced_hold);
    }

    #[test]
    fn weak_ml_is_ignored() {
        let out = integrator().integrate(&proposal(Side::Buy, 0.6), &prediction(Side::Sell, 0.2));
        assert_eq!(out.side, Side::Buy);
        assert!((out.confidence - 0.6).abs() < 1e-9);
        assert!(!out.components.ml_used);
    }

    #[test]
    fn high_confidence_ml_swings_disagreement() {
        let out = integrator().integrate(&proposal(Side::Buy, 0.6), &prediction(Side::Sell, 0.9));
        assert_eq!(out.side, Side::Sell);
        assert!((out.confidence - 0.9 * 0.85).abs() < 1e-9);
        assert!(out.components.swung_to_ml);
    }

    #[test]
    fn moderate_disagreement_penalizes_strategy_side() {
        let out = integrator().integrate(&proposal(Side::Buy, 0.6), &prediction(Side::Sell, 0.6));
        assert_eq!(out.side, Side::Buy);
        assert!((out.confidence - 0.6 * 0.85).abs() < 1e-9);
        assert!(!out.components.swung_to_ml);
    }

    #[test]
    fn low_confidence_converts_to_hold() {
        let out = integrator().integrate(&proposal(Side::Buy, 0.3), &prediction(Side::Sell, 0.5));
        // 0.3 * 0.85 = 0.255 < hold_conversion_threshold (0.35) → HOLD.
        assert_eq!(out.side, Side::Hold);
        assert!(out.components.forced_hold);
    }

    #[test]
    fn uniform_fallback_prediction_is_ignored() {
        let uniform = Prediction {
            probabilities: [1.0 / 3.0; 3],
            predicted: Side::Hold,
            confidence: 0.0,
            used_features: 0,
            level: DegradationLevel::Uniform,
        };
        let out = integrator().integrate(&proposal(Side::Buy, 0.6), &uniform);
        assert_eq!(out.side, Side::Buy);
        assert!(!out.components.ml_used);
        assert_eq!(out.components.ml_level, DegradationLevel::Uniform);
    }

    #[test]
    fn hold_proposal_with_high_confidence_ml_swings_to_ml() {
        let out = integrator().integrate(&proposal(Side::Hold, 0.0), &prediction(Side::Buy, 0.9));
        assert_eq!(out.side, Side::Buy);
        assert!(out.components.swung_to_ml);
    }
}
