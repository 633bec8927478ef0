// =============================================================================
// Inference interface — class-probability models behind a trait
// =============================================================================
//
// The trained artifacts are opaque blobs (ONNX exports of the LightGBM /
// XGBoost / RandomForest base models and the LightGBM meta-learner). All call
// sites depend only on this trait so the persistence format can change
// without touching them.
// =============================================================================

use crate::errors::ModelError;

/// Probabilities in training-target order: [SELL, HOLD, BUY].
pub type ClassProbs = [f64; 3];

pub trait ProbabilityModel: Send + Sync {
    /// Predict class probabilities for one feature row in canonical order.
    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbs, ModelError>;

    fn name(&self) -> &str;
}

/// Tolerance for the probability-sum invariant.
pub const PROB_SUM_TOLERANCE: f64 = 1e-6;

/// Validate and gently renormalize a probability vector. Small numeric drift
/// (float casts out of the ONNX runtime) is corrected; anything further off
/// is an inference error.
pub fn sanitize_probs(raw: ClassProbs, model: &str) -> Result<ClassProbs, ModelError> {
    if raw.iter().any(|p| !p.is_finite() || *p < 0.0 || *p > 1.0 + 1e-3) {
        return Err(ModelError::Inference(format!(
            "{model} produced an invalid probability vector: {raw:?}"
        )));
    }
    let sum: f64 = raw.iter().sum();
    if (sum - 1.0).abs() <= PROB_SUM_TOLERANCE {
        return Ok(raw);
    }
    if sum > 0.9 && sum < 1.1 {
        return Ok([raw[0] / sum, raw[1] / sum, raw[2] / sum]);
    }
    Err(ModelError::Inference(format!(
        "{model} probabilities sum to {sum}, expected 1.0"
    )))
}
