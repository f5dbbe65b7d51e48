//! Feature declarations for the clinical input form
//!
//! The catalog is the static description of every patient feature the form
//! collects: its kind, admissible values, default and display metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A labelled option of a categorical feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOption {
    /// Numeric code passed to the model
    pub value: f64,
    /// Label shown to the clinician
    pub label: String,
}

impl CategoryOption {
    pub fn new(value: f64, label: &str) -> Self {
        Self {
            value,
            label: label.to_string(),
        }
    }
}

/// Kind of a feature and its admissible values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeatureKind {
    /// Continuous value within an inclusive range
    Numerical {
        min: f64,
        max: f64,
        /// Widget step hint
        #[serde(default = "default_step")]
        step: f64,
    },
    /// One of a fixed set of coded values
    Categorical { options: Vec<CategoryOption> },
}

fn default_step() -> f64 {
    0.1
}

/// Declaration of one patient feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Feature name, identical to the model's training column name
    pub name: String,
    pub kind: FeatureKind,
    /// Value pre-filled in the form
    pub default: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
}

/// Errors in a feature declaration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("feature catalog is empty")]
    Empty,
    #[error("feature '{0}' is declared more than once")]
    DuplicateFeature(String),
    #[error("feature '{name}' has an invalid range [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("feature '{name}' default {default} is not admissible")]
    InvalidDefault { name: String, default: f64 },
    #[error("feature '{0}' declares no categorical options")]
    NoOptions(String),
    #[error("feature '{name}' declares option {value} more than once")]
    DuplicateOption { name: String, value: f64 },
}

impl FeatureSpec {
    pub fn numerical(name: &str, min: f64, max: f64, default: f64, unit: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureKind::Numerical {
                min,
                max,
                step: default_step(),
            },
            default,
            unit: unit.to_string(),
            description: description.to_string(),
        }
    }

    pub fn categorical(name: &str, options: Vec<CategoryOption>, default: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureKind::Categorical { options },
            default,
            unit: String::new(),
            description: description.to_string(),
        }
    }

    /// Check the declaration invariants: ordered finite bounds, admissible default
    pub fn validate(&self) -> Result<(), CatalogError> {
        match &self.kind {
            FeatureKind::Numerical { min, max, .. } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(CatalogError::InvalidRange {
                        name: self.name.clone(),
                        min: *min,
                        max: *max,
                    });
                }
            }
            FeatureKind::Categorical { options } => {
                if options.is_empty() {
                    return Err(CatalogError::NoOptions(self.name.clone()));
                }
                for (i, option) in options.iter().enumerate() {
                    if options[..i].iter().any(|o| o.value == option.value) {
                        return Err(CatalogError::DuplicateOption {
                            name: self.name.clone(),
                            value: option.value,
                        });
                    }
                }
            }
        }

        if self.admits(self.default) {
            Ok(())
        } else {
            Err(CatalogError::InvalidDefault {
                name: self.name.clone(),
                default: self.default,
            })
        }
    }

    /// Whether `value` is admissible for this feature
    pub fn admits(&self, value: f64) -> bool {
        self.check_value(value).is_ok()
    }

    /// Check a submitted value, returning the reason it is rejected
    pub fn check_value(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err("value is not a finite number".to_string());
        }
        match &self.kind {
            FeatureKind::Numerical { min, max, .. } => {
                if value < *min || value > *max {
                    Err(format!("outside the declared range [{}, {}]", min, max))
                } else {
                    Ok(())
                }
            }
            FeatureKind::Categorical { options } => {
                if options.iter().any(|o| o.value == value) {
                    Ok(())
                } else {
                    let allowed: Vec<String> = options.iter().map(|o| o.value.to_string()).collect();
                    Err(format!("not one of the allowed values [{}]", allowed.join(", ")))
                }
            }
        }
    }

    /// Render a value the way the form shows it
    pub fn display_value(&self, value: f64) -> String {
        match &self.kind {
            FeatureKind::Categorical { options } => options
                .iter()
                .find(|o| o.value == value)
                .map(|o| o.label.clone())
                .unwrap_or_else(|| value.to_string()),
            FeatureKind::Numerical { .. } => {
                if self.unit.is_empty() {
                    value.to_string()
                } else {
                    format!("{} {}", value, self.unit)
                }
            }
        }
    }

    /// Help text for the input widget
    pub fn help_text(&self) -> String {
        match &self.kind {
            FeatureKind::Numerical { min, max, .. } if self.unit.is_empty() => {
                format!("{} ({}-{})", self.description, min, max)
            }
            FeatureKind::Numerical { min, max, .. } => {
                format!("{} ({}-{} {})", self.description, min, max, self.unit)
            }
            FeatureKind::Categorical { .. } => self.description.clone(),
        }
    }
}

/// Ordered, validated set of feature declarations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureCatalog {
    features: Vec<FeatureSpec>,
}

impl FeatureCatalog {
    /// Build a catalog, enforcing the per-feature invariants and unique names
    pub fn new(features: Vec<FeatureSpec>) -> Result<Self, CatalogError> {
        if features.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for spec in &features {
            if !seen.insert(spec.name.as_str()) {
                return Err(CatalogError::DuplicateFeature(spec.name.clone()));
            }
            spec.validate()?;
        }

        Ok(Self { features })
    }

    /// Catalog of the seven features used by the gastric cancer survival model
    pub fn gastric_cancer() -> Self {
        Self {
            features: default_features(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Feature names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::gastric_cancer()
    }
}

/// Built-in declaration table
pub fn default_features() -> Vec<FeatureSpec> {
    vec![
        FeatureSpec::numerical("术中出血量", 0.0, 800.0, 50.0, "ml", "手术期间的出血量"),
        FeatureSpec::numerical("CEA", 0.0, 150.0, 8.68, "ng/ml", "癌胚抗原水平"),
        FeatureSpec::numerical("白蛋白", 1.0, 80.0, 38.6, "g/L", "血清白蛋白水平"),
        FeatureSpec::categorical(
            "TNM分期",
            vec![
                CategoryOption::new(1.0, "I期"),
                CategoryOption::new(2.0, "II期"),
                CategoryOption::new(3.0, "III期"),
                CategoryOption::new(4.0, "IV期"),
            ],
            2.0,
            "肿瘤分期",
        ),
        FeatureSpec::numerical("年龄", 25.0, 90.0, 76.0, "岁", "患者年龄"),
        FeatureSpec::numerical("术中肿瘤最大直径", 0.2, 20.0, 4.0, "cm", "肿瘤最大直径"),
        FeatureSpec::categorical(
            "淋巴血管侵犯",
            vec![CategoryOption::new(0.0, "否"), CategoryOption::new(1.0, "是")],
            1.0,
            "淋巴血管侵犯 (0=否, 1=是)",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = FeatureCatalog::new(default_features()).unwrap();
        assert_eq!(catalog.len(), 7);
        assert_eq!(catalog.names()[0], "术中出血量");
        assert!(catalog.contains("淋巴血管侵犯"));
    }

    #[test]
    fn test_default_outside_range_rejected() {
        let spec = FeatureSpec::numerical("CEA", 0.0, 150.0, 151.0, "ng/ml", "");
        assert_eq!(
            spec.validate(),
            Err(CatalogError::InvalidDefault {
                name: "CEA".to_string(),
                default: 151.0
            })
        );
    }

    #[test]
    fn test_categorical_default_must_be_an_option() {
        let spec = FeatureSpec::categorical(
            "淋巴血管侵犯",
            vec![CategoryOption::new(0.0, "否"), CategoryOption::new(1.0, "是")],
            2.0,
            "",
        );
        assert!(matches!(spec.validate(), Err(CatalogError::InvalidDefault { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut features = default_features();
        features.push(FeatureSpec::numerical("CEA", 0.0, 10.0, 1.0, "", ""));
        assert_eq!(
            FeatureCatalog::new(features),
            Err(CatalogError::DuplicateFeature("CEA".to_string()))
        );
    }

    #[test]
    fn test_check_value() {
        let catalog = FeatureCatalog::gastric_cancer();
        let age = catalog.get("年龄").unwrap();
        assert!(age.check_value(25.0).is_ok());
        assert!(age.check_value(90.0).is_ok());
        assert!(age.check_value(91.0).is_err());
        assert!(age.check_value(f64::NAN).is_err());

        let stage = catalog.get("TNM分期").unwrap();
        assert!(stage.check_value(3.0).is_ok());
        assert!(stage.check_value(2.5).is_err());
    }

    #[test]
    fn test_display_value() {
        let catalog = FeatureCatalog::gastric_cancer();
        assert_eq!(catalog.get("TNM分期").unwrap().display_value(3.0), "III期");
        assert_eq!(catalog.get("淋巴血管侵犯").unwrap().display_value(0.0), "否");
        assert_eq!(catalog.get("术中出血量").unwrap().display_value(50.0), "50 ml");
        assert_eq!(catalog.get("CEA").unwrap().help_text(), "癌胚抗原水平 (0-150 ng/ml)");
    }

    #[test]
    fn test_spec_deserialization() {
        let json = r#"{
            "name": "TNM分期",
            "kind": {"type": "categorical", "options": [{"value": 1, "label": "I期"}]},
            "default": 1
        }"#;
        let spec: FeatureSpec = serde_json::from_str(json).unwrap();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.unit, "");

        let json = r#"{"name": "CEA", "kind": {"type": "numerical", "min": 0, "max": 150}, "default": 8.68}"#;
        let spec: FeatureSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            spec.kind,
            FeatureKind::Numerical {
                min: 0.0,
                max: 150.0,
                step: 0.1
            }
        );
    }
}
