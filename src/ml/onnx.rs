// =============================================================================
// ONNX-backed probability model
// =============================================================================
//
// Wraps one ONNX Runtime session. The session is behind a `Mutex` because
// `run` takes the session mutably; cycles are single-threaded so there is no
// contention in practice.
// =============================================================================

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use tracing::info;

use crate::errors::ModelError;
use crate::ml::predictor::{sanitize_probs, ClassProbs, ProbabilityModel};

pub struct OnnxModel {
    session: Mutex<Session>,
    name: String,
    input_len: usize,
}

impl OnnxModel {
    /// Load an ONNX artifact from disk.
    pub fn load(path: &Path, name: impl Into<String>, input_len: usize) -> Result<Self, ModelError> {
        let name = name.into();
        if !path.exists() {
            return Err(ModelError::Load(format!(
                "{name}: artifact not found at {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| ModelError::Load(format!("{name}: session builder failed: {e}")))?
            .commit_from_file(path)
            .map_err(|e| ModelError::Load(format!("{name}: {e}")))?;

        info!(model = %name, path = %path.display(), input_len, "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            name,
            input_len,
        })
    }
}

impl ProbabilityModel for OnnxModel {
    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbs, ModelError> {
        if features.len() != self.input_len {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_len,
                got: features.len(),
            });
        }

        let flat: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        let shape = vec![1, self.input_len];

        let input_value = ort::value::Value::from_array((shape.as_slice(), flat))
            .map_err(|e| ModelError::Inference(format!("{}: input build failed: {e}", self.name)))?;
        let inputs = ort::inputs![input_value];

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Inference(format!("{}: session lock poisoned: {e}", self.name)))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| ModelError::Inference(format!("{}: {e}", self.name)))?;

        // Probability output is the last tensor-valued output (classifier
        // exports often emit [label, probabilities]).
        let mut probs: Option<ClassProbs> = None;
        for (_, value) in outputs.iter() {
            if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
                if data.len() >= 3 {
                    let tail = &data[data.len() - 3..];
                    probs = Some([tail[0] as f64, tail[1] as f64, tail[2] as f64]);
                }
            }
        }

        let raw = probs.ok_or_else(|| {
            ModelError::Inference(format!(
                "{}: no 3-class probability tensor in model output",
                self.name
            ))
        })?;

        sanitize_probs(raw, &self.name)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("name", &self.name)
            .field("input_len", &self.input_len)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_load_error() {
        let err = OnnxModel::load(Path::new("/nonexistent/model.onnx"), "lgbm", 55).unwrap_err();
        assert!(matches!(err, ModelError::Load(_)));
    }
}
