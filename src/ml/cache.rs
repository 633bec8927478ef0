// =============================================================================
// ModelCache — read-mostly ensemble holder with atomic swap on reload
// =============================================================================
//
// Loaded once at startup; cycles only read the current `Arc`. A hot reload
// builds the replacement ensemble off to the side and swaps the reference
// atomically, so an in-flight cycle keeps the snapshot it started with.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::features::FeatureManager;
use crate::ml::ensemble::{DegradationLevel, StackingEnsemble};

pub struct ModelCache {
    current: RwLock<Arc<StackingEnsemble>>,
    models_dir: PathBuf,
}

impl ModelCache {
    /// Load from disk, falling through the degradation ladder as needed.
    pub fn load(models_dir: impl Into<PathBuf>, manager: &FeatureManager) -> Self {
        let models_dir = models_dir.into();
        let ensemble = StackingEnsemble::load(&models_dir, manager);
        info!(level = %ensemble.level(), dir = %models_dir.display(), "model cache initialised");
        Self {
            current: RwLock::new(Arc::new(ensemble)),
            models_dir,
        }
    }

    /// Wrap an externally built ensemble (tests, alternative backends).
    pub fn from_ensemble(ensemble: StackingEnsemble) -> Self {
        Self {
            current: RwLock::new(Arc::new(ensemble)),
            models_dir: PathBuf::new(),
        }
    }

    /// The current ensemble snapshot. Cheap; safe to call every cycle.
    pub fn current(&self) -> Arc<StackingEnsemble> {
        self.current.read().clone()
    }

    pub fn level(&self) -> DegradationLevel {
        self.current.read().level()
    }

    /// Re-read artifacts from disk and atomically swap the snapshot in.
    pub fn reload(&self, manager: &FeatureManager) -> DegradationLevel {
        let replacement = Arc::new(StackingEnsemble::load(&self.models_dir, manager));
        let level = replacement.level();
        *self.current.write() = replacement;
        info!(level = %level, "model cache reloaded (atomic swap)");
        level
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("level", &self.level())
            .field("models_dir", &self.models_dir)
            .finish()
    }
}
