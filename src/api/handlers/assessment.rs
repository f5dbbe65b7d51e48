//! Assessment, catalog and model handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;

use crate::api::{ApiError, ApiResult, AppState};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::ModelStatus;
use crate::types::assessment::{AssessmentReport, AssessmentRequest};
use crate::types::feature::FeatureSpec;

/// Feature declaration with the widget help text
#[derive(Debug, Serialize)]
pub struct FeatureInfo {
    #[serde(flatten)]
    pub spec: FeatureSpec,
    pub help: String,
}

/// List the form's feature declarations
pub async fn features(State(state): State<AppState>) -> Json<Vec<FeatureInfo>> {
    Json(
        state
            .service
            .catalog()
            .iter()
            .map(|spec| FeatureInfo {
                help: spec.help_text(),
                spec: spec.clone(),
            })
            .collect(),
    )
}

/// Model availability and schema
pub async fn model(State(state): State<AppState>) -> ApiResult<Json<ModelStatus>> {
    let service = state.service.clone();
    let status = tokio::task::spawn_blocking(move || service.model_status())
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(status))
}

/// Score one patient
pub async fn assess(
    State(state): State<AppState>,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> ApiResult<Json<AssessmentReport>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let service = state.service.clone();
    let report = tokio::task::spawn_blocking(move || service.assess(&request))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))??;

    Ok(Json(report))
}

/// Service metrics snapshot
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.service.metrics().snapshot())
}
