//! Classifier abstraction shared by every model backend

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Input/output schema declared by a model artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSchema {
    /// Training-time feature order, when the artifact records it
    pub feature_names: Option<Vec<String>>,
    /// Class label at each probability index
    pub classes: Option<Vec<i64>>,
    /// Expected input width
    pub n_features: Option<usize>,
    /// Reference rows shipped with the artifact, in model feature order
    #[serde(skip)]
    pub background: Option<Vec<Vec<f64>>>,
}

impl ModelSchema {
    /// Label reported for a probability index; the index itself when classes are undeclared
    pub fn class_label(&self, index: usize) -> i64 {
        self.classes
            .as_ref()
            .and_then(|c| c.get(index).copied())
            .unwrap_or(index as i64)
    }

    /// Check the declared names and reference rows agree with each other
    pub fn validate(&self) -> Result<()> {
        let width = self
            .n_features
            .or_else(|| self.feature_names.as_ref().map(Vec::len));

        if let Some(names) = &self.feature_names {
            if let Some(n) = self.n_features {
                if names.len() != n {
                    bail!("model declares {} feature names for {} features", names.len(), n);
                }
            }
            let mut seen = HashSet::with_capacity(names.len());
            for name in names {
                if !seen.insert(name.as_str()) {
                    bail!("feature '{}' is declared more than once", name);
                }
            }
        }

        if let Some(rows) = &self.background {
            if rows.is_empty() {
                bail!("background block has no rows");
            }
            for (i, row) in rows.iter().enumerate() {
                if let Some(n) = width {
                    if row.len() != n {
                        bail!("background row {} has {} values, expected {}", i, row.len(), n);
                    }
                }
                if row.iter().any(|v| !v.is_finite()) {
                    bail!("background row {} has a non-finite value", i);
                }
            }
        }

        Ok(())
    }

    /// Reject inputs whose width contradicts the declared schema
    pub fn check_width(&self, features: &[f64]) -> Result<()> {
        let expected = self
            .n_features
            .or_else(|| self.feature_names.as_ref().map(Vec::len));
        match expected {
            Some(n) if n != features.len() => {
                anyhow::bail!("model expects {} features, got {}", n, features.len())
            }
            _ => Ok(()),
        }
    }
}

/// A trained probabilistic classifier.
///
/// Implementations are read-only after loading and shared across requests.
pub trait Classifier: Send + Sync {
    /// Schema declared by the artifact
    fn schema(&self) -> &ModelSchema;

    /// Per-class probabilities for one row
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>>;

    /// Most probable class label for one row
    fn predict(&self, features: &[f64]) -> Result<i64> {
        let probabilities = self.predict_proba(features)?;
        let index = argmax(&probabilities).context("model returned no class probabilities")?;
        Ok(self.schema().class_label(index))
    }

    /// Probabilities for several rows
    fn predict_proba_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.predict_proba(row)).collect()
    }
}

/// Lock a backend session that holds no state between runs.
///
/// A panic inside one run leaves nothing half-written, so a poisoned lock
/// is entered anyway rather than failing every later request.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub(crate) fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Index of the largest value, first one on ties
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(ModelSchema, Vec<f64>);

    impl Classifier for Constant {
        fn schema(&self) -> &ModelSchema {
            &self.0
        }

        fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
            self.0.check_width(features)?;
            Ok(self.1.clone())
        }
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.2, 0.8]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_predict_maps_index_to_class_label() {
        let schema = ModelSchema {
            classes: Some(vec![0, 1]),
            n_features: Some(2),
            ..Default::default()
        };
        let model = Constant(schema, vec![0.35, 0.65]);
        assert_eq!(model.predict(&[1.0, 2.0]).unwrap(), 1);
        assert!(model.predict(&[1.0]).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let schema = ModelSchema {
            feature_names: Some(vec!["年龄".into(), "CEA".into(), "年龄".into()]),
            n_features: Some(3),
            ..Default::default()
        };
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("'年龄' is declared more than once"));
    }

    #[test]
    fn test_validate_checks_background_rows() {
        let mut schema = ModelSchema {
            feature_names: Some(vec!["年龄".into(), "CEA".into()]),
            n_features: Some(2),
            background: Some(vec![vec![60.0, 4.0], vec![70.0, 12.0]]),
            ..Default::default()
        };
        assert!(schema.validate().is_ok());

        schema.background = Some(vec![vec![60.0]]);
        assert!(schema.validate().is_err());

        schema.background = Some(vec![vec![60.0, f64::NAN]]);
        assert!(schema.validate().is_err());

        schema.background = Some(Vec::new());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_session_lock_survives_a_panicking_run() {
        let session = std::sync::Arc::new(Mutex::new(0u32));

        let shared = session.clone();
        let result = std::thread::spawn(move || {
            let mut guard = shared.lock().unwrap();
            *guard += 1;
            panic!("run failed");
        })
        .join();
        assert!(result.is_err());
        assert!(session.is_poisoned());

        // Later runs still get the session
        let mut guard = lock_session(&*session);
        *guard += 1;
        assert_eq!(*guard, 2);
    }

    #[test]
    fn test_class_label_without_declared_classes() {
        let schema = ModelSchema::default();
        assert_eq!(schema.class_label(1), 1);
    }
}
