//! Risk assessment data structures

use crate::explainer::{AttributionResult, FeatureContribution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Upper bound (inclusive, percent) of the low-risk tier
pub const LOW_RISK_CEILING: f64 = 30.0;

/// Upper bound (inclusive, percent) of the medium-risk tier
pub const MEDIUM_RISK_CEILING: f64 = 70.0;

/// Coarse interpretation of the three-year death probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Determine the tier from a death probability in percent.
    ///
    /// Intervals are half-open on the left: exactly 30 is Low, exactly 70 is Medium.
    pub fn from_death_probability(death_probability: f64) -> Self {
        if death_probability > MEDIUM_RISK_CEILING {
            RiskTier::High
        } else if death_probability > LOW_RISK_CEILING {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    /// Label shown next to the gauge
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "低风险",
            RiskTier::Medium => "中等风险",
            RiskTier::High => "高风险",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one model invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Class label returned by `predict`
    pub predicted_label: i64,
    /// Per-class probabilities returned by `predict_proba`
    pub class_probabilities: Vec<f64>,
    /// Probability of the adverse outcome (index 1)
    pub positive_class_probability: f64,
    /// Three-year death risk, percent
    pub death_probability: f64,
    /// Three-year survival probability, percent
    pub survival_probability: f64,
    pub risk_tier: RiskTier,
}

/// Assessment request as submitted by the form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRequest {
    /// Caller-supplied correlation id
    #[serde(default)]
    pub request_id: Option<String>,

    /// Feature name to submitted value
    pub features: HashMap<String, f64>,
}

impl AssessmentRequest {
    pub fn new(features: HashMap<String, f64>) -> Self {
        Self {
            request_id: None,
            features,
        }
    }
}

/// A reconciled input value with its display rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub name: String,
    pub value: f64,
    pub display: String,
}

/// Full result of an assessment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentReport {
    /// Unique assessment identifier
    pub assessment_id: String,

    /// Correlation id from the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Assessment timestamp
    pub assessed_at: DateTime<Utc>,

    /// Reconciled inputs, in model order
    pub features: Vec<FeatureValue>,

    pub prediction: PredictionResult,

    /// Per-feature explanation, absent when attribution failed or is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionResult>,

    /// Contributions ranked for the waterfall chart
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waterfall: Vec<FeatureContribution>,

    /// Reason the explanation is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution_error: Option<String>,
}

impl AssessmentReport {
    pub fn new(features: Vec<FeatureValue>, prediction: PredictionResult) -> Self {
        Self {
            assessment_id: uuid::Uuid::new_v4().to_string(),
            request_id: None,
            assessed_at: Utc::now(),
            features,
            prediction,
            attribution: None,
            waterfall: Vec::new(),
            attribution_error: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_attribution(mut self, attribution: AttributionResult, max_display: usize) -> Self {
        self.waterfall = attribution.ranked(max_display);
        self.attribution = Some(attribution);
        self.attribution_error = None;
        self
    }

    pub fn with_attribution_error(mut self, error: String) -> Self {
        self.attribution = None;
        self.waterfall.clear();
        self.attribution_error = Some(error);
        self
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.prediction.risk_tier
    }
}

/// Reply to an assessment received over NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssessmentReply {
    Report(Box<AssessmentReport>),
    Error(ErrorReply),
}

/// Failure reply mirroring the HTTP error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_features: Option<Vec<String>>,
}

impl ErrorReply {
    pub fn new(kind: &str, error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            kind: kind.to_string(),
            missing_features: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier_for(p1: f64) -> RiskTier {
        RiskTier::from_death_probability(p1 * 100.0)
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_for(0.0), RiskTier::Low);
        assert_eq!(tier_for(0.30), RiskTier::Low);
        assert_eq!(tier_for(0.30000001), RiskTier::Medium);
        assert_eq!(tier_for(0.70), RiskTier::Medium);
        assert_eq!(tier_for(0.70000001), RiskTier::High);
        assert_eq!(tier_for(1.0), RiskTier::High);
    }

    #[test]
    fn test_tier_matches_interval_definition() {
        for i in 0..=1000 {
            let p1 = i as f64 / 1000.0;
            let death = p1 * 100.0;
            let expected = if death <= 30.0 {
                RiskTier::Low
            } else if death <= 70.0 {
                RiskTier::Medium
            } else {
                RiskTier::High
            };
            assert_eq!(tier_for(p1), expected, "p1 = {}", p1);
        }
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&RiskTier::Medium).unwrap(), "\"medium\"");
        assert_eq!(RiskTier::High.label(), "高风险");
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{"features": {"年龄": 76, "CEA": 8.68}}"#;
        let request: AssessmentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.request_id, None);
        assert_eq!(request.features.get("年龄"), Some(&76.0));
    }
}
