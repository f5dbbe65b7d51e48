//! Error handling

use crate::error::{AssessmentError, ReconcileError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Assessment ended without a prediction
    Assessment(AssessmentError),

    /// Request body could not be parsed
    BadRequest(String),

    /// Worker task failed
    InternalError(String),
}

impl From<AssessmentError> for ApiError {
    fn from(err: AssessmentError) -> Self {
        ApiError::Assessment(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, kind, missing) = match &self {
            ApiError::Assessment(err) => {
                let status = match err {
                    AssessmentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    AssessmentError::Reconcile(ReconcileError::MissingFeatures(_))
                    | AssessmentError::Reconcile(ReconcileError::InvalidValue { .. }) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    AssessmentError::Prediction(_) => {
                        tracing::error!("Prediction error: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string(), err.kind(), err.missing_features())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "bad_request", None),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal",
                    None,
                )
            }
        };

        let mut body = json!({
            "error": message,
            "kind": kind,
            "status": status.as_u16()
        });
        if let Some(missing) = missing {
            body["missing_features"] = json!(missing);
        }

        (status, Json(body)).into_response()
    }
}
