//! Model artifact loader

use crate::config::{ModelConfig, ModelFormat};
use crate::error::LoadError;
use crate::models::classifier::{Classifier, ModelSchema};
use crate::models::forest::RandomForest;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

/// Loaded classifier with metadata
pub struct LoadedModel {
    /// Model name (artifact file stem)
    pub name: String,
    /// Artifact path
    pub path: String,
    pub format: ModelFormat,
    pub loaded_at: DateTime<Utc>,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(name: &str, format: ModelFormat, classifier: Box<dyn Classifier>) -> Self {
        Self {
            name: name.to_string(),
            path: String::new(),
            format,
            loaded_at: Utc::now(),
            classifier,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn schema(&self) -> &ModelSchema {
        self.classifier.schema()
    }

    /// Training-time feature order, when the artifact declares one
    pub fn expected_feature_order(&self) -> Option<&[String]> {
        self.schema().feature_names.as_deref()
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("format", &self.format)
            .field("schema", self.schema())
            .finish()
    }
}

/// Loader for classifier artifacts
pub struct ModelLoader {
    format: ModelFormat,
    /// Label that must sit at probability index 1
    adverse_class_label: i64,
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a loader for the given artifact format
    pub fn new(format: ModelFormat) -> Self {
        Self {
            format,
            adverse_class_label: 1,
            onnx_threads: 1,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            format: config.format.clone(),
            adverse_class_label: config.adverse_class_label,
            onnx_threads: config.onnx_threads,
        }
    }

    pub fn with_adverse_class_label(mut self, label: i64) -> Self {
        self.adverse_class_label = label;
        self
    }

    /// Load and validate one artifact
    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModel, LoadError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        if !path.exists() {
            return Err(LoadError::NotFound { path: path_str });
        }

        info!(path = %path_str, format = ?self.format, "Loading model artifact");

        let classifier = self.load_classifier(path)?;
        self.check_adverse_class(classifier.schema())?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());

        let schema = classifier.schema();
        info!(
            model = %name,
            features = ?schema.feature_names,
            classes = ?schema.classes,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name,
            path: path_str,
            format: self.format.clone(),
            loaded_at: Utc::now(),
            classifier,
        })
    }

    fn load_classifier(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadError> {
        let corrupt = |e: anyhow::Error| LoadError::Corrupt {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        };

        match self.format {
            ModelFormat::Forest => {
                let json = std::fs::read_to_string(path).map_err(|e| corrupt(e.into()))?;
                let forest = RandomForest::from_json(&json).map_err(corrupt)?;
                Ok(Box::new(forest))
            }
            #[cfg(feature = "onnx")]
            ModelFormat::Onnx => {
                let model = crate::models::onnx::OnnxClassifier::load(path, self.onnx_threads).map_err(corrupt)?;
                Ok(Box::new(model))
            }
            #[cfg(not(feature = "onnx"))]
            ModelFormat::Onnx => {
                let _ = self.onnx_threads;
                Err(LoadError::UnsupportedFormat("onnx".to_string()))
            }
        }
    }

    /// The adverse outcome must be the class at probability index 1
    fn check_adverse_class(&self, schema: &ModelSchema) -> Result<(), LoadError> {
        match &schema.classes {
            Some(classes) if classes.get(1) == Some(&self.adverse_class_label) => Ok(()),
            Some(classes) => Err(LoadError::AdverseClassMismatch {
                expected: self.adverse_class_label,
                classes: classes.clone(),
            }),
            None => {
                warn!(
                    adverse_class_label = self.adverse_class_label,
                    "Model does not declare class labels, assuming index 1 is the adverse outcome"
                );
                Ok(())
            }
        }
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new(ModelFormat::Forest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_artifact(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    const FOREST: &str = r#"{
        "feature_names": ["年龄"],
        "classes": [0, 1],
        "n_features": 1,
        "trees": [{"nodes": [
            {"feature": 0, "threshold": 60.0, "left": 1, "right": 2},
            {"value": [8.0, 2.0]},
            {"value": [2.0, 8.0]}
        ]}]
    }"#;

    #[test]
    fn test_load_forest() {
        let file = write_artifact(FOREST);
        let model = ModelLoader::default().load_model(file.path()).unwrap();

        assert_eq!(model.expected_feature_order(), Some(&["年龄".to_string()][..]));
        let p = model.classifier().predict_proba(&[70.0]).unwrap();
        assert!((p[1] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_missing_artifact() {
        let err = ModelLoader::default()
            .load_model("/nonexistent/rf.json")
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn test_corrupt_artifact() {
        let file = write_artifact("{\"trees\": 3}");
        let err = ModelLoader::default().load_model(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Corrupt { .. }));
    }

    #[test]
    fn test_duplicate_feature_names_are_corrupt() {
        let doc = FOREST
            .replace("\"feature_names\": [\"年龄\"]", "\"feature_names\": [\"年龄\", \"年龄\"]")
            .replace("\"n_features\": 1", "\"n_features\": 2");
        let file = write_artifact(&doc);
        match ModelLoader::default().load_model(file.path()).unwrap_err() {
            LoadError::Corrupt { reason, .. } => assert!(reason.contains("declared more than once")),
            other => panic!("expected a corrupt artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_adverse_class_must_be_at_index_one() {
        let file = write_artifact(&FOREST.replace("[0, 1]", "[1, 0]"));
        let err = ModelLoader::default().load_model(file.path()).unwrap_err();
        assert_eq!(
            err,
            LoadError::AdverseClassMismatch {
                expected: 1,
                classes: vec![1, 0]
            }
        );

        // A differently coded adverse label is accepted when configured
        let file = write_artifact(&FOREST.replace("[0, 1]", "[0, 2]"));
        let model = ModelLoader::default()
            .with_adverse_class_label(2)
            .load_model(file.path());
        assert!(model.is_ok());
    }

    #[test]
    fn test_bundled_artifact_loads() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("models/gastric_rf.json");
        let model = ModelLoader::default().load_model(&path).unwrap();

        assert_eq!(model.name, "gastric_rf");
        assert_eq!(model.schema().classes, Some(vec![0, 1]));
        assert_eq!(model.expected_feature_order().map(|f| f.len()), Some(7));
        assert_eq!(model.schema().background.as_ref().map(Vec::len), Some(32));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let file = write_artifact("");
        let err = ModelLoader::new(ModelFormat::Onnx)
            .load_model(file.path())
            .unwrap_err();
        assert_eq!(err, LoadError::UnsupportedFormat("onnx".to_string()));
    }
}
