//! Process-wide, load-once model handle

use crate::config::ModelConfig;
use crate::error::LoadError;
use crate::models::loader::{LoadedModel, ModelLoader};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::error;

/// Lazily loads the model artifact exactly once and shares it afterwards.
///
/// The outcome is memoized either way: a failed load leaves prediction
/// unavailable for the rest of the process lifetime instead of retrying on
/// every request.
pub struct ModelHandle {
    path: PathBuf,
    loader: ModelLoader,
    cell: OnceLock<Result<Arc<LoadedModel>, LoadError>>,
}

impl ModelHandle {
    pub fn new<P: Into<PathBuf>>(path: P, loader: ModelLoader) -> Self {
        Self {
            path: path.into(),
            loader,
            cell: OnceLock::new(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.path, ModelLoader::from_config(config))
    }

    /// Handle around an already loaded model
    pub fn preloaded(model: LoadedModel) -> Self {
        let handle = Self::new(model.path.clone(), ModelLoader::new(model.format.clone()));
        let _ = handle.cell.set(Ok(Arc::new(model)));
        handle
    }

    /// The loaded model, loading it on first use.
    ///
    /// Concurrent first callers block on a single load.
    pub fn get(&self) -> Result<Arc<LoadedModel>, LoadError> {
        self.cell
            .get_or_init(|| {
                self.loader.load_model(&self.path).map(Arc::new).map_err(|e| {
                    error!(path = %self.path.display(), error = %e, "Model load failed, prediction unavailable");
                    e
                })
            })
            .clone()
    }

    /// Whether a load has been attempted and succeeded
    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    #[test]
    fn test_load_is_memoized() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"n_features": 1, "classes": [0, 1], "trees": [{"nodes": [{"value": [1.0, 1.0]}]}]}"#,
        )
        .unwrap();

        let handle = Arc::new(ModelHandle::new(file.path(), ModelLoader::default()));
        assert!(!handle.is_loaded());

        let models: Vec<Arc<LoadedModel>> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.get().unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();

        assert!(handle.is_loaded());
        for model in &models[1..] {
            assert!(Arc::ptr_eq(&models[0], model));
        }
    }

    #[test]
    fn test_load_failure_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rf.json");
        let handle = ModelHandle::new(&path, ModelLoader::default());

        assert!(matches!(handle.get(), Err(LoadError::NotFound { .. })));

        // Creating the artifact afterwards does not resurrect the handle
        std::fs::write(
            &path,
            r#"{"n_features": 1, "trees": [{"nodes": [{"value": [1.0, 1.0]}]}]}"#,
        )
        .unwrap();
        assert!(matches!(handle.get(), Err(LoadError::NotFound { .. })));
        assert!(!handle.is_loaded());
    }
}
