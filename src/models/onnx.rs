//! ONNX Runtime backend for exported classifiers
//!
//! ONNX graphs do not carry training column names in a portable way, so the
//! schema comes from an optional `<artifact>.schema.json` sidecar:
//! `{"feature_names": [...], "classes": [0, 1], "background": [[...], ...]}`.

use crate::models::classifier::{lock_session, Classifier, ModelSchema};
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
struct SchemaSidecar {
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    #[serde(default)]
    classes: Option<Vec<i64>>,
    #[serde(default)]
    background: Option<Vec<Vec<f64>>>,
}

/// Classifier backed by an ONNX Runtime session
pub struct OnnxClassifier {
    /// Runs need exclusive access to the session
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    schema: ModelSchema,
}

impl OnnxClassifier {
    /// Load an ONNX classifier and its schema sidecar
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();

        ort::init().commit()?;
        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        let sidecar = read_sidecar(&sidecar_path(path))?;
        let n_features = sidecar.feature_names.as_ref().map(Vec::len);

        info!(
            input = %input_name,
            output = %output_name,
            declared_features = ?n_features,
            "ONNX model loaded"
        );

        let schema = ModelSchema {
            feature_names: sidecar.feature_names,
            classes: sidecar.classes,
            n_features,
            background: sidecar.background,
        };
        schema.validate().context("invalid schema sidecar")?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            schema,
        })
    }

    /// Extract the class probability vector from the session outputs.
    /// Handles plain tensors and the `seq(map(int64, float))` zipmap output.
    fn extract_probabilities(&self, outputs: &ort::session::SessionOutputs) -> Result<Vec<f64>> {
        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
                return Ok(data.iter().map(|&p| p as f64).collect());
            }
            if DynSequenceValueType::can_downcast(&output.dtype()) {
                return self.extract_from_sequence_map(output);
            }
        }

        // Fallback: first non-label output that yields probabilities
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
                debug!(output = %name, "Extracted probabilities from fallback output");
                return Ok(data.iter().map(|&p| p as f64).collect());
            }
            if DynSequenceValueType::can_downcast(&output.dtype()) {
                if let Ok(probabilities) = self.extract_from_sequence_map(&output) {
                    return Ok(probabilities);
                }
            }
        }

        anyhow::bail!("model produced no probability output")
    }

    /// Probabilities ordered by class id from a zipmap output
    fn extract_from_sequence_map(&self, output: &ort::value::DynValue) -> Result<Vec<f64>> {
        let allocator = Allocator::default();

        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;

        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
        let map_value = maps.first().context("Empty probability sequence")?;

        let mut kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
        kv_pairs.sort_by_key(|(class_id, _)| *class_id);

        Ok(kv_pairs.into_iter().map(|(_, p)| p as f64).collect())
    }
}

impl Classifier for OnnxClassifier {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        use ort::value::Tensor;

        self.schema.check_width(features)?;

        let shape = vec![1_i64, features.len() as i64];
        let data: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let input_tensor = Tensor::from_array((shape, data)).context("Failed to create input tensor")?;

        let mut session = lock_session(&self.session);
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        self.extract_probabilities(&outputs)
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".schema.json");
    PathBuf::from(name)
}

fn read_sidecar(path: &Path) -> Result<SchemaSidecar> {
    if !path.exists() {
        warn!(path = %path.display(), "No schema sidecar, feature order falls back to the catalog");
        return Ok(SchemaSidecar::default());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid schema sidecar {:?}", path))
}
