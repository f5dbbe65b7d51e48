//! JSON HTTP API consumed by the input form

mod error;
pub mod handlers;

use crate::pipeline::RiskService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RiskService>,
}

impl AppState {
    pub fn new(service: Arc<RiskService>) -> Self {
        Self { service }
    }
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/v1/features", get(handlers::assessment::features))
        .route("/api/v1/model", get(handlers::assessment::model))
        .route("/api/v1/assess", post(handlers::assessment::assess))
        .route("/api/v1/metrics", get(handlers::assessment::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExplainerConfig;
    use crate::metrics::ServiceMetrics;
    use crate::models::{ModelHandle, ModelLoader};
    use crate::pipeline::tests::{sample_features, sample_service};
    use crate::types::feature::FeatureCatalog;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::new(Arc::new(sample_service())))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_assess(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/assess")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_features_listing() {
        let (status, body) = send(app(), get("/api/v1/features")).await;
        assert_eq!(status, StatusCode::OK);

        let features = body.as_array().unwrap();
        assert_eq!(features.len(), 7);
        assert_eq!(features[0]["name"], "术中出血量");
        assert_eq!(features[0]["kind"]["type"], "numerical");
        assert_eq!(features[3]["kind"]["options"][1]["label"], "II期");
    }

    #[tokio::test]
    async fn test_assess_returns_report() {
        let (status, body) = send(
            app(),
            post_assess(json!({"request_id": "req-1", "features": sample_features()})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request_id"], "req-1");
        assert_eq!(body["prediction"]["risk_tier"], "medium");
        assert_eq!(body["features"].as_array().unwrap().len(), 7);
        assert_eq!(body["features"][0]["name"], "年龄");
        assert_eq!(body["features"][0]["display"], "76 岁");
        assert!(body["attribution"]["contributions"].is_array());
    }

    #[tokio::test]
    async fn test_assess_missing_features() {
        let mut features = sample_features();
        features.remove("白蛋白");
        features.remove("年龄");

        let (status, body) = send(app(), post_assess(json!({ "features": features }))).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "missing_features");
        assert_eq!(body["missing_features"], json!(["年龄", "白蛋白"]));
    }

    #[tokio::test]
    async fn test_assess_malformed_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/assess")
            .header("content-type", "application/json")
            .body(Body::from("{\"features\": 3"))
            .unwrap();

        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_unavailable_model() {
        let service = RiskService::new(
            Arc::new(ModelHandle::new("/nonexistent/rf.json", ModelLoader::default())),
            FeatureCatalog::gastric_cancer(),
            ExplainerConfig::default(),
            Arc::new(ServiceMetrics::new()),
        );
        let app = create_router(AppState::new(Arc::new(service)));

        let (status, body) = send(
            app.clone(),
            post_assess(json!({ "features": sample_features() })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "unavailable");

        let (status, body) = send(app, get("/api/v1/model")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], false);
    }

    #[tokio::test]
    async fn test_metrics_after_assessment() {
        let app = app();
        send(
            app.clone(),
            post_assess(json!({ "features": sample_features() })),
        )
        .await;

        let (status, body) = send(app, get("/api/v1/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assessments_processed"], 1);
    }
}
