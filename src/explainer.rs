//! Per-feature additive attribution for a single prediction.
//!
//! Contributions are interventional Shapley values of the adverse-class
//! probability: features outside a coalition take their values from a
//! background reference set. Small inputs are solved exactly by enumerating
//! every coalition; wider inputs fall back to seeded permutation sampling.
//! Both methods are additive: `base_value + Σ contribution == output_value`.

use crate::config::ExplainerConfig;
use crate::error::AttributionError;
use crate::models::classifier::Classifier;
use crate::reconciler::FeatureReconciler;
use crate::scorer::ADVERSE_CLASS_INDEX;
use crate::types::feature::FeatureCatalog;
use crate::types::vector::FeatureVector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Hard ceiling on exact enumeration regardless of configuration
const EXACT_FEATURE_LIMIT: usize = 16;

/// How the contributions were computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionMethod {
    /// Full coalition enumeration
    Exact,
    /// Monte-Carlo permutation sampling
    Sampled,
}

/// Contribution of one input feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub name: String,
    /// Submitted value of the feature, absent on the folded remainder entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_value: Option<f64>,
    /// Push on the adverse-class probability, positive means higher risk
    pub contribution: f64,
}

/// Additive explanation of one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    /// One entry per input feature, in model order
    pub contributions: Vec<FeatureContribution>,
    /// Expected adverse-class probability over the background
    pub base_value: f64,
    /// Adverse-class probability of the explained row
    pub output_value: f64,
    pub method: AttributionMethod,
}

impl AttributionResult {
    /// Contributions by descending magnitude, for waterfall display.
    ///
    /// When there are more than `max_display` features the smallest ones are
    /// folded into a single trailing entry so the total is unchanged.
    pub fn ranked(&self, max_display: usize) -> Vec<FeatureContribution> {
        let mut sorted = self.contributions.clone();
        sorted.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));

        if max_display == 0 || sorted.len() <= max_display {
            return sorted;
        }

        let rest = sorted.split_off(max_display - 1);
        sorted.push(FeatureContribution {
            name: format!("{} other features", rest.len()),
            feature_value: None,
            contribution: rest.iter().map(|c| c.contribution).sum(),
        });
        sorted
    }

    /// Sum of all contributions
    pub fn total(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.contribution)
    }
}

/// Background rows in model order.
///
/// Rows configured under `explainer.background` are in catalog order and take
/// precedence; otherwise the reference set shipped with the model artifact is
/// used as is. Without either there is nothing to explain against.
pub fn reference_rows(
    catalog: &FeatureCatalog,
    configured: &[Vec<f64>],
    shipped: Option<&[Vec<f64>]>,
    reconciler: &FeatureReconciler<'_>,
) -> Result<Vec<Vec<f64>>, AttributionError> {
    if configured.is_empty() {
        return match shipped {
            Some(rows) if !rows.is_empty() => Ok(rows.to_vec()),
            _ => Err(AttributionError(
                "no background reference set: the model ships none and explainer.background is empty"
                    .to_string(),
            )),
        };
    }

    configured
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let named: HashMap<String, f64> = catalog
                .iter()
                .map(|spec| spec.name.clone())
                .zip(row.iter().copied())
                .collect();
            reconciler
                .reconcile(&named)
                .map(|vector| vector.values().to_vec())
                .map_err(|e| AttributionError(format!("background row {}: {}", i, e)))
        })
        .collect()
}

/// Shapley value explainer over a loaded classifier
pub struct AttributionExplainer<'a> {
    model: &'a dyn Classifier,
    config: &'a ExplainerConfig,
}

impl<'a> AttributionExplainer<'a> {
    pub fn new(model: &'a dyn Classifier, config: &'a ExplainerConfig) -> Self {
        Self { model, config }
    }

    /// Explain the adverse-class probability of `vector` against `background`
    pub fn explain(
        &self,
        vector: &FeatureVector,
        background: &[Vec<f64>],
    ) -> Result<AttributionResult, AttributionError> {
        let x = vector.values();
        if background.is_empty() {
            return Err(AttributionError("empty background set".to_string()));
        }
        if let Some(row) = background.iter().find(|row| row.len() != x.len()) {
            return Err(AttributionError(format!(
                "background row has {} values, input has {}",
                row.len(),
                x.len()
            )));
        }

        let output_value = self.adverse_probability(x)?;
        let base_value = background
            .iter()
            .map(|row| self.adverse_probability(row))
            .sum::<Result<f64, _>>()?
            / background.len() as f64;

        let (phi, method) = if x.len() <= self.config.max_exact_features.min(EXACT_FEATURE_LIMIT) {
            (self.exact(x, background)?, AttributionMethod::Exact)
        } else {
            (self.sampled(x, background)?, AttributionMethod::Sampled)
        };

        debug!(
            method = ?method,
            base_value,
            output_value,
            "Attribution computed"
        );

        let contributions = vector
            .iter()
            .zip(phi)
            .map(|((name, feature_value), contribution)| FeatureContribution {
                name: name.to_string(),
                feature_value: Some(feature_value),
                contribution,
            })
            .collect();

        Ok(AttributionResult {
            contributions,
            base_value,
            output_value,
            method,
        })
    }

    fn adverse_probability(&self, row: &[f64]) -> Result<f64, AttributionError> {
        let probabilities = self
            .model
            .predict_proba(row)
            .map_err(|e| AttributionError(format!("{:#}", e)))?;
        probabilities
            .get(ADVERSE_CLASS_INDEX)
            .copied()
            .filter(|p| p.is_finite())
            .ok_or_else(|| {
                AttributionError(format!(
                    "model returned {} class probabilities, no usable value at index {}",
                    probabilities.len(),
                    ADVERSE_CLASS_INDEX
                ))
            })
    }

    /// Expected output with coalition features from `x` and the rest from each background row
    fn coalition_value(
        &self,
        x: &[f64],
        background: &[Vec<f64>],
        mask: usize,
    ) -> Result<f64, AttributionError> {
        let mut total = 0.0;
        let mut z = vec![0.0; x.len()];
        for row in background {
            for (i, slot) in z.iter_mut().enumerate() {
                *slot = if mask & (1 << i) != 0 { x[i] } else { row[i] };
            }
            total += self.adverse_probability(&z)?;
        }
        Ok(total / background.len() as f64)
    }

    fn exact(&self, x: &[f64], background: &[Vec<f64>]) -> Result<Vec<f64>, AttributionError> {
        let d = x.len();
        let coalitions = 1usize << d;

        let values = (0..coalitions)
            .map(|mask| self.coalition_value(x, background, mask))
            .collect::<Result<Vec<f64>, _>>()?;

        let mut factorial = vec![1.0f64; d + 1];
        for k in 1..=d {
            factorial[k] = factorial[k - 1] * k as f64;
        }

        let mut phi = vec![0.0; d];
        for mask in 0..coalitions {
            let size = mask.count_ones() as usize;
            if size == d {
                continue;
            }
            let weight = factorial[size] * factorial[d - size - 1] / factorial[d];
            for (i, p) in phi.iter_mut().enumerate() {
                if mask & (1 << i) == 0 {
                    *p += weight * (values[mask | (1 << i)] - values[mask]);
                }
            }
        }
        Ok(phi)
    }

    /// Every sampled permutation is walked from each background row to `x`,
    /// so the contributions of one walk telescope to `f(x) - f(b)`.
    fn sampled(&self, x: &[f64], background: &[Vec<f64>]) -> Result<Vec<f64>, AttributionError> {
        let d = x.len();
        let samples = self.config.permutation_samples.max(1);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..d).collect();
        let mut phi = vec![0.0; d];

        for _ in 0..samples {
            order.shuffle(&mut rng);
            for row in background {
                let mut z = row.clone();
                let mut previous = self.adverse_probability(&z)?;
                for &i in &order {
                    z[i] = x[i];
                    let current = self.adverse_probability(&z)?;
                    phi[i] += current - previous;
                    previous = current;
                }
            }
        }

        let walks = (samples * background.len()) as f64;
        phi.iter_mut().for_each(|p| *p /= walks);
        Ok(phi)
    }
}
