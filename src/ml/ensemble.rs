// =============================================================================
// Stacking ensemble — three base classifiers and a meta-learner
// =============================================================================
//
// Level-0: LightGBM (reference weight 0.4), XGBoost (0.4), RandomForest (0.2)
// over the 49 market features (basic) or all 55 features (full). Level-1: a
// LightGBM meta-learner trained with the SELL class deliberately up-weighted
// (>= 1.5x) over 15 meta-features:
//
//   [0..9)   three class probabilities from each base model
//   [9..12)  each base model's max probability
//   [12]     model-agreement flag (all three argmax equal)
//   [13]     Shannon entropy of the weighted-average probability vector
//   [14]     top-1 minus top-2 gap of that vector
//
// Degradation ladder:
//   level 0 — full 55-feature ensemble
//   level 1 — basic 49-feature ensemble; the 6 strategy-signal columns are
//             DROPPED (not zero-filled): the basic models never saw those
//             columns in training, and zero is a meaningful HOLD encoding.
//             The policy is recorded in the artifact metadata.
//   level 2 — uniform [1/3, 1/3, 1/3] with confidence 0; entries disabled.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ModelError;
use crate::features::schema::{MARKET_FEATURES, TOTAL_FEATURES};
use crate::features::FeatureManager;
use crate::ml::onnx::OnnxModel;
use crate::ml::predictor::{sanitize_probs, ClassProbs, ProbabilityModel};
use crate::types::Side;

pub const META_FEATURES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Full,
    Basic,
    Uniform,
}

impl DegradationLevel {
    pub fn index(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Basic => 1,
            Self::Uniform => 2,
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Basic => write!(f, "basic"),
            Self::Uniform => write!(f, "uniform"),
        }
    }
}

/// One inference result.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// [SELL, HOLD, BUY], summing to 1.
    pub probabilities: ClassProbs,
    pub predicted: Side,
    /// max(probabilities); 0.0 under the uniform fallback.
    pub confidence: f64,
    pub used_features: usize,
    pub level: DegradationLevel,
}

/// Reference weights of the base models in the averaged probability vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseWeights {
    pub lightgbm: f64,
    pub xgboost: f64,
    pub random_forest: f64,
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            lightgbm: 0.4,
            xgboost: 0.4,
            random_forest: 0.2,
        }
    }
}

impl BaseWeights {
    fn as_array(&self) -> [f64; 3] {
        [self.lightgbm, self.xgboost, self.random_forest]
    }
}

/// Artifact metadata shared by the full and basic ensembles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    /// Canonical 55-name feature order the models were trained against.
    pub feature_order: Vec<String>,
    #[serde(default)]
    pub base_weights: BaseWeights,
    /// How basic-ensemble inference treats the strategy-signal columns.
    #[serde(default = "default_strategy_signal_policy")]
    pub strategy_signal_policy: String,
    /// SELL-class weight multiplier used when training the meta-learner.
    #[serde(default = "default_sell_class_weight")]
    pub sell_class_weight: f64,
    #[serde(default)]
    pub training_stats: serde_json::Value,
}

fn default_strategy_signal_policy() -> String {
    "drop".to_string()
}

fn default_sell_class_weight() -> f64 {
    1.5
}

/// The four models of one ensemble level.
pub struct BaseModels {
    pub lightgbm: Box<dyn ProbabilityModel>,
    pub xgboost: Box<dyn ProbabilityModel>,
    pub random_forest: Box<dyn ProbabilityModel>,
    pub meta: Box<dyn ProbabilityModel>,
}

pub struct StackingEnsemble {
    level: DegradationLevel,
    models: Option<BaseModels>,
    weights: [f64; 3],
    /// How many of the 55 canonical features this level consumes.
    used_features: usize,
}

impl StackingEnsemble {
    /// Load artifacts from `models_dir`, falling through the degradation
    /// ladder. Never fails: the worst case is the uniform fallback.
    pub fn load(models_dir: &Path, manager: &FeatureManager) -> Self {
        let metadata = match Self::load_metadata(models_dir, manager) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "ensemble metadata unusable — uniform fallback");
                return Self::uniform();
            }
        };
        let weights = metadata.base_weights.as_array();

        match Self::load_level(&models_dir.join("full"), TOTAL_FEATURES) {
            Ok(models) => {
                info!(version = %metadata.version, "full ensemble loaded (level 0)");
                return Self {
                    level: DegradationLevel::Full,
                    models: Some(models),
                    weights,
                    used_features: TOTAL_FEATURES,
                };
            }
            Err(e) => warn!(error = %e, "full ensemble unavailable — trying basic"),
        }

        match Self::load_level(&models_dir.join("basic"), MARKET_FEATURES) {
            Ok(models) => {
                info!(
                    version = %metadata.version,
                    policy = %metadata.strategy_signal_policy,
                    "basic ensemble loaded (level 1)"
                );
                Self {
                    level: DegradationLevel::Basic,
                    models: Some(models),
                    weights,
                    used_features: MARKET_FEATURES,
                }
            }
            Err(e) => {
                warn!(error = %e, "basic ensemble unavailable — uniform fallback (level 2)");
                Self::uniform()
            }
        }
    }

    fn load_metadata(models_dir: &Path, manager: &FeatureManager) -> Result<ModelMetadata, ModelError> {
        let path = models_dir.join("metadata.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ModelError::Load(format!("metadata read failed: {e}")))?;
        let metadata: ModelMetadata = serde_json::from_str(&content)
            .map_err(|e| ModelError::Load(format!("metadata parse failed: {e}")))?;

        // Training-time feature order must match the canonical schema exactly.
        if metadata.feature_order != manager.feature_names() {
            return Err(ModelError::Load(
                "metadata feature order diverges from the canonical schema".to_string(),
            ));
        }
        if metadata.strategy_signal_policy != "drop" {
            return Err(ModelError::Load(format!(
                "unsupported strategy_signal_policy '{}'",
                metadata.strategy_signal_policy
            )));
        }
        Ok(metadata)
    }

    fn load_level(dir: &Path, input_len: usize) -> Result<BaseModels, ModelError> {
        Ok(BaseModels {
            lightgbm: Box::new(OnnxModel::load(&dir.join("lgbm.onnx"), "lightgbm", input_len)?),
            xgboost: Box::new(OnnxModel::load(&dir.join("xgb.onnx"), "xgboost", input_len)?),
            random_forest: Box::new(OnnxModel::load(
                &dir.join("rf.onnx"),
                "random_forest",
                input_len,
            )?),
            meta: Box::new(OnnxModel::load(&dir.join("meta.onnx"), "meta", META_FEATURES)?),
        })
    }

    /// The level-2 fallback: uniform probabilities, zero confidence.
    pub fn uniform() -> Self {
        Self {
            level: DegradationLevel::Uniform,
            models: None,
            weights: BaseWeights::default().as_array(),
            used_features: 0,
        }
    }

    /// Assemble an ensemble from externally constructed models. Used to plug
    /// in stub models in tests and alternative backends.
    pub fn from_parts(models: BaseModels, weights: BaseWeights, level: DegradationLevel) -> Self {
        let used_features = match level {
            DegradationLevel::Full => TOTAL_FEATURES,
            DegradationLevel::Basic => MARKET_FEATURES,
            DegradationLevel::Uniform => 0,
        };
        Self {
            level,
            models: if level == DegradationLevel::Uniform {
                None
            } else {
                Some(models)
            },
            weights: weights.as_array(),
            used_features,
        }
    }

    pub fn level(&self) -> DegradationLevel {
        self.level
    }

    /// Run stacking inference on one canonical 55-feature row.
    pub fn predict(&self, features: &[f64]) -> Result<Prediction, ModelError> {
        if self.level == DegradationLevel::Uniform {
            return Ok(Prediction {
                probabilities: [1.0 / 3.0; 3],
                predicted: Side::Hold,
                confidence: 0.0,
                used_features: 0,
                level: DegradationLevel::Uniform,
            });
        }

        // The input contract is always the full canonical row; the basic
        // level drops the trailing strategy-signal columns itself.
        if features.len() != TOTAL_FEATURES {
            return Err(ModelError::ShapeMismatch {
                expected: TOTAL_FEATURES,
                got: features.len(),
            });
        }
        let input = &features[..self.used_features];

        let models = self
            .models
            .as_ref()
            .expect("non-uniform ensemble always carries models");

        let base = [
            models.lightgbm.predict_proba(input)?,
            models.xgboost.predict_proba(input)?,
            models.random_forest.predict_proba(input)?,
        ];

        let meta_input = meta_features(&base, &self.weights);
        let probabilities = sanitize_probs(models.meta.predict_proba(&meta_input)?, "meta")?;

        let class = argmax(&probabilities);
        let predicted = Side::from_class_index(class).expect("argmax of 3-vector is in range");

        Ok(Prediction {
            probabilities,
            predicted,
            confidence: probabilities[class],
            used_features: self.used_features,
            level: self.level,
        })
    }
}

impl std::fmt::Debug for StackingEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackingEnsemble")
            .field("level", &self.level)
            .field("used_features", &self.used_features)
            .finish()
    }
}

/// Build the 15 meta-features from the three base probability vectors.
pub fn meta_features(base: &[ClassProbs; 3], weights: &[f64; 3]) -> [f64; META_FEATURES] {
    let mut out = [0.0; META_FEATURES];

    for (m, probs) in base.iter().enumerate() {
        for (c, p) in probs.iter().enumerate() {
            out[m * 3 + c] = *p;
        }
        out[9 + m] = probs[argmax(probs)];
    }

    let votes: Vec<usize> = base.iter().map(argmax).collect();
    out[12] = f64::from(u8::from(votes[0] == votes[1] && votes[1] == votes[2]));

    let avg = weighted_average(base, weights);
    out[13] = shannon_entropy(&avg);
    out[14] = top_gap(&avg);

    out
}

fn weighted_average(base: &[ClassProbs; 3], weights: &[f64; 3]) -> ClassProbs {
    let total: f64 = weights.iter().sum();
    let mut avg = [0.0; 3];
    for (probs, w) in base.iter().zip(weights) {
        for (a, p) in avg.iter_mut().zip(probs) {
            *a += w * p;
        }
    }
    if total > 0.0 {
        for a in &mut avg {
            *a /= total;
        }
    }
    avg
}

/// Shannon entropy (natural log). Zero terms contribute nothing.
fn shannon_entropy(probs: &ClassProbs) -> f64 {
    -probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// Gap between the largest and second-largest probability.
fn top_gap(probs: &ClassProbs) -> f64 {
    let mut sorted = *probs;
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted[0] - sorted[1]
}

fn argmax(probs: &ClassProbs) -> usize {
    let mut best = 0;
    for i in 1..3 {
        if probs[i] > probs[best] {
            best = i;
        }
    }
    best
}
