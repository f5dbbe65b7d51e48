//! Type definitions for the survival risk service

pub mod assessment;
pub mod feature;
pub mod vector;

pub use assessment::{
    AssessmentReply, AssessmentReport, AssessmentRequest, ErrorReply, FeatureValue, PredictionResult, RiskTier,
};
pub use feature::{CategoryOption, FeatureCatalog, FeatureKind, FeatureSpec};
pub use vector::FeatureVector;
