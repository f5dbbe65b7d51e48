//! Feature schema reconciliation.
//!
//! Turns the name → value mapping submitted by the form into the ordered
//! vector the model was trained on. The model's declared feature order is
//! authoritative; the catalog order is only used when the artifact does not
//! record one.

use crate::error::ReconcileError;
use crate::types::assessment::FeatureValue;
use crate::types::feature::FeatureCatalog;
use crate::types::vector::FeatureVector;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Disagreement between the catalog and the model schema.
///
/// Deployment signal only; prediction follows the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaWarning {
    /// The model requires a feature the form does not declare
    UndeclaredModelFeature(String),
    /// The form declares a feature the model does not use
    UnusedCatalogFeature(String),
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaWarning::UndeclaredModelFeature(name) => {
                write!(f, "model requires feature '{}' which the form does not declare", name)
            }
            SchemaWarning::UnusedCatalogFeature(name) => {
                write!(f, "form declares feature '{}' which the model does not use", name)
            }
        }
    }
}

/// Aligns submitted features with the model's expected order
pub struct FeatureReconciler<'a> {
    catalog: &'a FeatureCatalog,
    /// Training-time order declared by the model
    expected_order: Option<&'a [String]>,
    /// Order actually used: the model's, else the catalog's
    order: Vec<String>,
}

impl<'a> FeatureReconciler<'a> {
    pub fn new(catalog: &'a FeatureCatalog, expected_order: Option<&'a [String]>) -> Self {
        let order = match expected_order {
            Some(names) => names.to_vec(),
            None => catalog.names(),
        };
        Self {
            catalog,
            expected_order,
            order,
        }
    }

    /// Feature order of reconciled vectors
    pub fn input_order(&self) -> &[String] {
        &self.order
    }

    /// Whether the order comes from the model rather than the catalog fallback
    pub fn uses_model_order(&self) -> bool {
        self.expected_order.is_some()
    }

    /// Build the model input from a submitted mapping.
    ///
    /// Every expected feature must be present; all absent names are reported
    /// together, in model order. Submitted keys the model does not use are
    /// dropped.
    pub fn reconcile(&self, raw: &HashMap<String, f64>) -> Result<FeatureVector, ReconcileError> {
        let missing: Vec<String> = self
            .order
            .iter()
            .filter(|name| !raw.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ReconcileError::MissingFeatures(missing));
        }

        let mut values = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let value = raw[name.as_str()];
            let check = match self.catalog.get(name) {
                Some(spec) => spec.check_value(value),
                None if value.is_finite() => Ok(()),
                None => Err("value is not a finite number".to_string()),
            };
            if let Err(reason) = check {
                return Err(ReconcileError::InvalidValue {
                    name: name.clone(),
                    value,
                    reason,
                });
            }
            values.push(value);
        }

        if raw.len() > self.order.len() {
            let extra: Vec<&String> = raw.keys().filter(|k| !self.order.contains(*k)).collect();
            debug!(extra = ?extra, "Dropping features the model does not use");
        }

        Ok(FeatureVector::from_parts(self.order.clone(), values))
    }

    /// Compare the catalog with the model schema.
    /// Empty when the model declares no order, as there is nothing to compare.
    pub fn schema_warnings(&self) -> Vec<SchemaWarning> {
        let Some(expected) = self.expected_order else {
            return Vec::new();
        };

        let mut warnings: Vec<SchemaWarning> = expected
            .iter()
            .filter(|name| !self.catalog.contains(name))
            .map(|name| SchemaWarning::UndeclaredModelFeature(name.clone()))
            .collect();

        warnings.extend(
            self.catalog
                .iter()
                .filter(|spec| !expected.contains(&spec.name))
                .map(|spec| SchemaWarning::UnusedCatalogFeature(spec.name.clone())),
        );

        warnings
    }

    /// Reconciled values with their form rendering
    pub fn describe(&self, vector: &FeatureVector) -> Vec<FeatureValue> {
        vector
            .iter()
            .map(|(name, value)| FeatureValue {
                name: name.to_string(),
                value,
                display: self
                    .catalog
                    .get(name)
                    .map(|spec| spec.display_value(value))
                    .unwrap_or_else(|| value.to_string()),
            })
            .collect()
    }
}
