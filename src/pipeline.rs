//! Assessment pipeline: model handle, reconciliation, scoring, attribution

use crate::config::{AppConfig, ExplainerConfig};
use crate::error::{AssessmentError, AttributionError};
use crate::explainer::{reference_rows, AttributionExplainer, AttributionResult};
use crate::metrics::ServiceMetrics;
use crate::models::handle::ModelHandle;
use crate::models::loader::LoadedModel;
use crate::reconciler::FeatureReconciler;
use crate::scorer::RiskScorer;
use crate::types::assessment::{AssessmentReport, AssessmentRequest};
use crate::types::feature::FeatureCatalog;
use crate::types::vector::FeatureVector;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model availability and schema, as seen by the form
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_features: Option<usize>,
    /// Size of the reference set shipped with the artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_rows: Option<usize>,
    /// Order in which features are passed to the model
    pub input_order: Vec<String>,
    /// Catalog and model disagreements
    pub warnings: Vec<String>,
}

/// Runs one assessment request end to end.
///
/// Shared by the HTTP and NATS front ends; all work is synchronous and
/// CPU-bound, callers move it off the async runtime.
pub struct RiskService {
    handle: Arc<ModelHandle>,
    catalog: FeatureCatalog,
    explainer: ExplainerConfig,
    metrics: Arc<ServiceMetrics>,
}

impl RiskService {
    pub fn new(
        handle: Arc<ModelHandle>,
        catalog: FeatureCatalog,
        explainer: ExplainerConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            handle,
            catalog,
            explainer,
            metrics,
        }
    }

    pub fn from_config(config: &AppConfig, metrics: Arc<ServiceMetrics>) -> Result<Self> {
        Ok(Self::new(
            Arc::new(ModelHandle::from_config(&config.model)),
            config.catalog()?,
            config.explainer.clone(),
            metrics,
        ))
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Assess one request, recording the outcome in the service metrics
    pub fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentReport, AssessmentError> {
        let start = Instant::now();

        match self.run(request) {
            Ok(report) => {
                let elapsed = start.elapsed();
                self.metrics.record_assessment(
                    elapsed,
                    report.prediction.death_probability,
                    report.risk_tier(),
                );
                if report.attribution_error.is_some() {
                    self.metrics.record_attribution_failure();
                }
                info!(
                    assessment_id = %report.assessment_id,
                    request_id = ?report.request_id,
                    risk_tier = %report.risk_tier(),
                    death_probability = report.prediction.death_probability,
                    processing_time_us = elapsed.as_micros() as u64,
                    "Assessment complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.metrics.record_failure(e.kind());
                warn!(request_id = ?request.request_id, kind = e.kind(), error = %e, "Assessment failed");
                Err(e)
            }
        }
    }

    fn run(&self, request: &AssessmentRequest) -> Result<AssessmentReport, AssessmentError> {
        let model = self.handle.get()?;

        let reconciler = FeatureReconciler::new(&self.catalog, model.expected_feature_order());
        let vector = reconciler.reconcile(&request.features)?;
        debug!(order = ?vector.names(), "Features reconciled");

        let prediction = RiskScorer::new(model.classifier()).score(&vector)?;

        let report = AssessmentReport::new(reconciler.describe(&vector), prediction)
            .with_request_id(request.request_id.clone());

        if !self.explainer.enabled {
            return Ok(report);
        }

        // Attribution is best effort, the prediction stands on its own
        Ok(match self.explain(&model, &reconciler, &vector) {
            Ok(attribution) => report.with_attribution(attribution, self.explainer.max_display),
            Err(e) => {
                warn!(error = %e, "Attribution failed, returning prediction without explanation");
                report.with_attribution_error(e.to_string())
            }
        })
    }

    fn explain(
        &self,
        model: &LoadedModel,
        reconciler: &FeatureReconciler<'_>,
        vector: &FeatureVector,
    ) -> Result<AttributionResult, AttributionError> {
        let background = reference_rows(
            &self.catalog,
            &self.explainer.background,
            model.schema().background.as_deref(),
            reconciler,
        )?;
        AttributionExplainer::new(model.classifier(), &self.explainer).explain(vector, &background)
    }

    /// Availability and schema of the model, loading it if needed
    pub fn model_status(&self) -> ModelStatus {
        match self.handle.get() {
            Ok(model) => {
                let reconciler = FeatureReconciler::new(&self.catalog, model.expected_feature_order());
                let schema = model.schema();
                ModelStatus {
                    available: true,
                    error: None,
                    name: Some(model.name.clone()),
                    loaded_at: Some(model.loaded_at),
                    expected_features: schema.feature_names.clone(),
                    classes: schema.classes.clone(),
                    n_features: schema.n_features,
                    background_rows: schema.background.as_ref().map(Vec::len),
                    input_order: reconciler.input_order().to_vec(),
                    warnings: reconciler
                        .schema_warnings()
                        .iter()
                        .map(|w| w.to_string())
                        .collect(),
                }
            }
            Err(e) => ModelStatus {
                available: false,
                error: Some(e.to_string()),
                name: None,
                loaded_at: None,
                expected_features: None,
                classes: None,
                n_features: None,
                background_rows: None,
                input_order: self.catalog.names(),
                warnings: Vec::new(),
            },
        }
    }
}
