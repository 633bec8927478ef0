pub mod cache;
pub mod ensemble;
pub mod onnx;
pub mod predictor;

pub use cache::ModelCache;
pub use ensemble::{
    BaseModels, BaseWeights, DegradationLevel, ModelMetadata, Prediction, StackingEnsemble,
};
pub use predictor::{ClassProbs, ProbabilityModel};
