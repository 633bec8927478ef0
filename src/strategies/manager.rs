// =============================================================================
// StrategyManager — regime-aware weighted voting over the strategy set
// =============================================================================
//
// For each side, the score is the sum of `weight * confidence` over the
// strategies voting that side, with the weight vector selected by the current
// regime. The winner is the side with the highest score.
//
// Tie-break policy on equal scores: HOLD wins over a directional side, BUY
// wins over SELL. Output confidence is the winner's score renormalized by the
// total directional (non-HOLD) score, clamped to [0, 1].
//
// Every per-strategy contribution is logged for post-mortem traceability.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DynamicStrategySelection;
use crate::errors::ConfigError;
use crate::regime::MarketRegime;
use crate::strategies::{StrategySignal, STRATEGY_NAMES};
use crate::types::Side;

/// The contribution of one strategy to the final vote.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyContribution {
    pub strategy: String,
    pub side: Side,
    pub weight: f64,
    pub confidence: f64,
    pub weighted_score: f64,
}

/// Combined directional proposal for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyProposal {
    pub side: Side,
    pub confidence: f64,
    pub buy_score: f64,
    pub sell_score: f64,
    pub hold_score: f64,
    pub regime: MarketRegime,
    pub contributions: Vec<StrategyContribution>,
}

pub struct StrategyManager {
    /// regime key → (strategy name → weight), validated at construction.
    weights: HashMap<String, HashMap<String, f64>>,
}

impl StrategyManager {
    /// Build from the validated configuration mapping.
    pub fn new(selection: &DynamicStrategySelection) -> Result<Self, ConfigError> {
        for (regime, weights) in &selection.regime_strategy_mapping {
            for name in STRATEGY_NAMES {
                if !weights.contains_key(name) {
                    return Err(ConfigError::Invalid(format!(
                        "regime {regime} has no weight for strategy {name}"
                    )));
                }
            }
        }
        Ok(Self {
            weights: selection.regime_strategy_mapping.clone(),
        })
    }

    /// Weight vector for a regime. Validation at startup guarantees presence.
    fn weight_for(&self, regime: MarketRegime, strategy: &str) -> f64 {
        self.weights
            .get(regime.as_str())
            .and_then(|m| m.get(strategy))
            .copied()
            .unwrap_or(0.0)
    }

    /// Combine the six per-strategy signals into one proposal.
    pub fn combine(&self, signals: &[StrategySignal], regime: MarketRegime) -> StrategyProposal {
        let mut buy_score = 0.0;
        let mut sell_score = 0.0;
        let mut hold_score = 0.0;
        let mut contributions = Vec::with_capacity(signals.len());

        for signal in signals {
            let weight = self.weight_for(regime, signal.strategy);
            let weighted = weight * signal.confidence;

            match signal.side {
                Side::Buy => buy_score += weighted,
                Side::Sell => sell_score += weighted,
                Side::Hold => hold_score += weighted,
            }

            contributions.push(StrategyContribution {
                strategy: signal.strategy.to_string(),
                side: signal.side,
                weight,
                confidence: signal.confidence,
                weighted_score: weighted,
            });

            debug!(
                strategy = signal.strategy,
                side = %signal.side,
                weight,
                confidence = signal.confidence,
                weighted,
                regime = %regime,
                "strategy contribution"
            );
        }

        // Winner selection with the strict tie-break order: HOLD beats a
        // directional side on equal score, BUY beats SELL.
        let side = if hold_score >= buy_score && hold_score >= sell_score {
            Side::Hold
        } else if buy_score >= sell_score {
            Side::Buy
        } else {
            Side::Sell
        };

        let winner_score = match side {
            Side::Buy => buy_score,
            Side::Sell => sell_score,
            Side::Hold => hold_score,
        };

        let directional_total = buy_score + sell_score;
        let confidence = if directional_total > 0.0 {
            (winner_score / directional_total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        info!(
            side = %side,
            confidence = format!("{:.3}", confidence),
            buy_score = format!("{:.3}", buy_score),
            sell_score = format!("{:.3}", sell_score),
            hold_score = format!("{:.3}", hold_score),
            regime = %regime,
            "strategy vote combined"
        );

        StrategyProposal {
            side,
            confidence,
            buy_score,
            sell_score,
            hold_score,
            regime,
            contributions,
        }
    }
}
