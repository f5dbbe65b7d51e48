//! Error taxonomy of the assessment pipeline

use thiserror::Error;

/// The model artifact could not be loaded.
///
/// Cached by the model handle, so it is cheap to clone and carries messages
/// rather than source errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("model artifact not found at {path}")]
    NotFound { path: String },

    #[error("model artifact at {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("adverse outcome label {expected} is not the class at probability index 1 (model classes: {classes:?})")]
    AdverseClassMismatch { expected: i64, classes: Vec<i64> },

    #[error("model format '{0}' is not supported by this build")]
    UnsupportedFormat(String),
}

/// The submitted features cannot be turned into a model input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// Features the model requires but the request did not supply, in model order
    #[error("missing features required by the model: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),

    #[error("invalid value {value} for feature '{name}': {reason}")]
    InvalidValue {
        name: String,
        value: f64,
        reason: String,
    },
}

/// The model failed while scoring one request
#[derive(Debug, Clone, PartialEq, Error)]
#[error("prediction failed: {0}")]
pub struct PredictionError(pub String);

/// The explanation for one prediction could not be produced
#[derive(Debug, Clone, PartialEq, Error)]
#[error("attribution failed: {0}")]
pub struct AttributionError(pub String);

/// Terminal failures of an assessment request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssessmentError {
    #[error("prediction unavailable: {0}")]
    Unavailable(#[from] LoadError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

impl AssessmentError {
    /// Short machine-readable kind, used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AssessmentError::Unavailable(_) => "unavailable",
            AssessmentError::Reconcile(ReconcileError::MissingFeatures(_)) => "missing_features",
            AssessmentError::Reconcile(ReconcileError::InvalidValue { .. }) => "invalid_value",
            AssessmentError::Prediction(_) => "prediction",
        }
    }

    /// Missing feature names, when that is the cause
    pub fn missing_features(&self) -> Option<&[String]> {
        match self {
            AssessmentError::Reconcile(ReconcileError::MissingFeatures(names)) => Some(names),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_features_message() {
        let err = ReconcileError::MissingFeatures(vec!["CEA".to_string(), "年龄".to_string()]);
        assert_eq!(err.to_string(), "missing features required by the model: CEA, 年龄");

        let err: AssessmentError = err.into();
        assert_eq!(err.kind(), "missing_features");
        assert_eq!(err.missing_features().map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_unavailable_wraps_load_error() {
        let err: AssessmentError = LoadError::NotFound {
            path: "models/rf.json".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "unavailable");
        assert!(err.to_string().contains("models/rf.json"));
    }
}
