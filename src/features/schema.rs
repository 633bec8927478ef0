// =============================================================================
// Canonical feature schema — the single authority for feature identity
// =============================================================================
//
// The schema file pins the exact name, order, category, and expected range of
// every feature column. Training and inference both read this file; any
// divergence between the two is a training/inference parity bug, which is why
// the schema is validated at startup and immutable afterwards (swapping it
// requires a restart).
//
// Layout contract:
//   - exactly 55 features: 49 market features followed by 6 strategy-signal
//     features (one per registered strategy, in registry order);
//   - 15 market features are flagged canonical, distributed over the seven
//     market categories as basic(2) momentum(2) volatility(2) trend(2)
//     volume(1) breakout(3) regime(3).
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::strategies::STRATEGY_NAMES;

pub const TOTAL_FEATURES: usize = 55;
pub const MARKET_FEATURES: usize = 49;
pub const STRATEGY_FEATURES: usize = 6;
pub const CANONICAL_FEATURES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Basic,
    Momentum,
    Volatility,
    Trend,
    Volume,
    Breakout,
    Regime,
    StrategySignal,
}

impl FeatureCategory {
    /// Canonical-feature quota for each market category.
    fn canonical_quota(self) -> usize {
        match self {
            Self::Basic => 2,
            Self::Momentum => 2,
            Self::Volatility => 2,
            Self::Trend => 2,
            Self::Volume => 1,
            Self::Breakout => 3,
            Self::Regime => 3,
            Self::StrategySignal => 0,
        }
    }
}

/// Definition of a single feature column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    pub category: FeatureCategory,
    /// Member of the canonical 15-feature core set.
    #[serde(default)]
    pub canonical: bool,
    /// Expected value range (soft bounds, for diagnostics).
    pub min: f64,
    pub max: f64,
}

/// The full ordered schema, as loaded from `feature_schema.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: String,
    pub features: Vec<FeatureDef>,
}

impl FeatureSchema {
    /// Load and validate the schema file. Any failure here is fatal at
    /// startup — the pipeline must not run against an unverified schema.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let schema: Self = serde_json::from_str(&content)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features.len() != TOTAL_FEATURES {
            return Err(ConfigError::Invalid(format!(
                "feature schema must define exactly {TOTAL_FEATURES} features, found {}",
                self.features.len()
            )));
        }

        let mut seen = HashSet::new();
        for def in &self.features {
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate feature name '{}'",
                    def.name
                )));
            }
            if def.min >= def.max {
                return Err(ConfigError::Invalid(format!(
                    "feature '{}' has an empty expected range [{}, {}]",
                    def.name, def.min, def.max
                )));
            }
        }

        // 49 market features first, then the 6 strategy-signal columns in
        // registry order.
        let market = &self.features[..MARKET_FEATURES];
        let strategy = &self.features[MARKET_FEATURES..];

        if market
            .iter()
            .any(|d| d.category == FeatureCategory::StrategySignal)
        {
            return Err(ConfigError::Invalid(
                "strategy-signal features must come after all market features".to_string(),
            ));
        }
        for (def, expected_strategy) in strategy.iter().zip(STRATEGY_NAMES) {
            if def.category != FeatureCategory::StrategySignal {
                return Err(ConfigError::Invalid(format!(
                    "feature '{}' must have category strategy_signal",
                    def.name
                )));
            }
            let expected_name = format!("sig_{expected_strategy}");
            if def.name != expected_name {
                return Err(ConfigError::Invalid(format!(
                    "strategy-signal feature '{}' out of order, expected '{expected_name}'",
                    def.name
                )));
            }
            if def.canonical {
                return Err(ConfigError::Invalid(format!(
                    "strategy-signal feature '{}' cannot be canonical",
                    def.name
                )));
            }
        }

        // Canonical quota per category.
        let canonical_total = self.features.iter().filter(|d| d.canonical).count();
        if canonical_total != CANONICAL_FEATURES {
            return Err(ConfigError::Invalid(format!(
                "expected {CANONICAL_FEATURES} canonical features, found {canonical_total}"
            )));
        }
        for category in [
            FeatureCategory::Basic,
            FeatureCategory::Momentum,
            FeatureCategory::Volatility,
            FeatureCategory::Trend,
            FeatureCategory::Volume,
            FeatureCategory::Breakout,
            FeatureCategory::Regime,
        ] {
            let count = self
                .features
                .iter()
                .filter(|d| d.category == category && d.canonical)
                .count();
            if count != category.canonical_quota() {
                return Err(ConfigError::Invalid(format!(
                    "category {category:?} must have {} canonical features, found {count}",
                    category.canonical_quota()
                )));
            }
        }

        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|d| d.name.clone()).collect()
    }
}
