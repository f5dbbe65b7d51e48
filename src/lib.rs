//! Gastric Cancer Survival Risk Library
//!
//! Post-operative three-year survival risk scoring for gastric cancer
//! patients: feature schema reconciliation against a trained classifier,
//! risk tiering and per-feature attribution.

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod explainer;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod reconciler;
pub mod scorer;
pub mod types;

pub use config::AppConfig;
pub use error::{AssessmentError, LoadError};
pub use models::ModelHandle;
pub use pipeline::RiskService;
pub use types::{AssessmentReport, AssessmentRequest, RiskTier};
