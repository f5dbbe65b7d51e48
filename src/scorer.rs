//! Risk scoring: model invocation and tier derivation

use crate::error::PredictionError;
use crate::models::classifier::Classifier;
use crate::types::assessment::{PredictionResult, RiskTier};
use crate::types::vector::FeatureVector;
use tracing::debug;

/// Probability index of the adverse outcome (death within three years).
/// Swapping it silently inverts the clinical meaning of every score.
pub const ADVERSE_CLASS_INDEX: usize = 1;

/// Allowed deviation of the probability sum from 1
const PROBABILITY_TOLERANCE: f64 = 1e-4;

/// Scores reconciled vectors against a loaded classifier
pub struct RiskScorer<'a> {
    model: &'a dyn Classifier,
}

impl<'a> RiskScorer<'a> {
    pub fn new(model: &'a dyn Classifier) -> Self {
        Self { model }
    }

    /// Run `predict` and `predict_proba` and interpret the adverse-class probability
    pub fn score(&self, vector: &FeatureVector) -> Result<PredictionResult, PredictionError> {
        let features = vector.values();

        let predicted_label = self
            .model
            .predict(features)
            .map_err(|e| PredictionError(format!("{:#}", e)))?;
        let class_probabilities = self
            .model
            .predict_proba(features)
            .map_err(|e| PredictionError(format!("{:#}", e)))?;

        check_probabilities(&class_probabilities)?;

        let result = interpret(predicted_label, class_probabilities);

        debug!(
            predicted_label = result.predicted_label,
            death_probability = result.death_probability,
            risk_tier = %result.risk_tier,
            "Prediction complete"
        );

        Ok(result)
    }
}

/// Build the result from validated class probabilities
fn interpret(predicted_label: i64, class_probabilities: Vec<f64>) -> PredictionResult {
    let positive_class_probability = class_probabilities[ADVERSE_CLASS_INDEX];
    let death_probability = positive_class_probability * 100.0;
    let survival_probability = 100.0 - death_probability;

    PredictionResult {
        predicted_label,
        class_probabilities,
        positive_class_probability,
        death_probability,
        survival_probability,
        risk_tier: RiskTier::from_death_probability(death_probability),
    }
}

fn check_probabilities(probabilities: &[f64]) -> Result<(), PredictionError> {
    if probabilities.len() <= ADVERSE_CLASS_INDEX {
        return Err(PredictionError(format!(
            "model returned {} class probabilities, need at least {}",
            probabilities.len(),
            ADVERSE_CLASS_INDEX + 1
        )));
    }
    if probabilities
        .iter()
        .any(|p| !p.is_finite() || *p < 0.0 || *p > 1.0)
    {
        return Err(PredictionError(format!(
            "model returned probabilities outside [0, 1]: {:?}",
            probabilities
        )));
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(PredictionError(format!(
            "class probabilities sum to {}, expected 1",
            sum
        )));
    }
    Ok(())
}
