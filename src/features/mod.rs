pub mod frame;
pub mod generator;
pub mod manager;
pub mod schema;

pub use frame::{FeatureFrame, FeatureRow};
pub use generator::{composite_trend_strength, FeatureGenerator};
pub use manager::{FeatureManager, SchemaReport};
pub use schema::{FeatureCategory, FeatureDef, FeatureSchema};
