// =============================================================================
// FeatureManager — process-wide authority on feature identity and order
// =============================================================================
//
// Every other component reads the schema through this object. There is no
// mutation API: the manager is built once at startup from the canonical
// schema file and swapping schemas requires a restart.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::errors::ConfigError;
use crate::features::frame::FeatureFrame;
use crate::features::schema::{FeatureDef, FeatureSchema, MARKET_FEATURES};

/// Result of validating a frame against the canonical schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    pub ok: bool,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub order_mismatch: bool,
}

pub struct FeatureManager {
    schema: FeatureSchema,
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureManager {
    /// Initialize from the canonical schema file. Fails hard (startup-fatal)
    /// on a missing or invalid schema.
    pub fn from_schema_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let schema = FeatureSchema::from_file(path)?;
        let names = schema.names();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        info!(
            path = %path.display(),
            version = %schema.version,
            features = names.len(),
            "feature schema loaded"
        );

        Ok(Self {
            schema,
            names,
            index,
        })
    }

    pub fn schema_version(&self) -> &str {
        &self.schema.version
    }

    /// Ordered canonical feature names. Column order is a contract; inference
    /// inputs must match this bytewise.
    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn feature_count(&self) -> usize {
        self.names.len()
    }

    /// The 49 market features (everything except the strategy-signal columns).
    pub fn market_feature_count(&self) -> usize {
        MARKET_FEATURES
    }

    pub fn market_feature_names(&self) -> &[String] {
        &self.names[..MARKET_FEATURES]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn definition(&self, name: &str) -> Option<&FeatureDef> {
        self.index_of(name).map(|i| &self.schema.features[i])
    }

    /// Compare a frame's columns against the canonical schema.
    pub fn validate(&self, frame: &FeatureFrame) -> SchemaReport {
        let frame_cols: HashMap<&str, usize> = frame
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let missing: Vec<String> = self
            .names
            .iter()
            .filter(|n| !frame_cols.contains_key(n.as_str()))
            .cloned()
            .collect();

        let extra: Vec<String> = frame
            .columns()
            .iter()
            .filter(|c| !self.index.contains_key(c.as_str()))
            .cloned()
            .collect();

        let order_mismatch = missing.is_empty()
            && extra.is_empty()
            && frame.columns().iter().zip(&self.names).any(|(a, b)| a != b);

        SchemaReport {
            ok: missing.is_empty() && extra.is_empty() && !order_mismatch,
            missing,
            extra,
            order_mismatch,
        }
    }
}

impl std::fmt::Debug for FeatureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureManager")
            .field("version", &self.schema.version)
            .field("features", &self.names.len())
            .finish()
    }
}
