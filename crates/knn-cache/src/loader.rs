//! The load seam between the cache and the engine layer.

use std::path::Path;
use std::sync::Arc;

use knn_engine::{open_index, EngineError, EngineSpec, NativeIndex};
use knn_types::{EngineSettings, SettingsManager};

/// Opens the index behind a cache key. Blocking; the cache calls it from
/// the blocking pool. Tests substitute instrumented loaders here.
pub trait IndexLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeIndex>, EngineError>;
}

/// The production loader: picks the engine from the file extension and
/// applies the configured open parameters.
pub struct EngineLoader {
    spec: EngineSpec,
}

impl EngineLoader {
    pub fn new(spec: EngineSpec) -> Self {
        Self { spec }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(EngineSpec {
            space: settings.space_type,
            ef_search: settings.ef_search,
        })
    }
}

impl IndexLoader for EngineLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeIndex>, EngineError> {
        open_index(path, &self.spec)
    }
}

/// Loader that follows the live settings: each load applies the engine
/// parameters current at that moment. A settings change rebuilds the cache,
/// so entries opened under old parameters do not linger.
pub struct SettingsEngineLoader {
    settings: Arc<SettingsManager>,
}

impl SettingsEngineLoader {
    pub fn new(settings: Arc<SettingsManager>) -> Self {
        Self { settings }
    }
}

impl IndexLoader for SettingsEngineLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeIndex>, EngineError> {
        let engine = self.settings.current().engine;
        open_index(
            path,
            &EngineSpec {
                space: engine.space_type,
                ef_search: engine.ef_search,
            },
        )
    }
}
