//! Random forest classifier loaded from a JSON tree dump
//!
//! The document mirrors a scikit-learn forest: every tree is a flat node
//! array rooted at index 0, a split sends a row left when
//! `x[feature] <= threshold`, and a leaf holds per-class sample weights.
//! An optional `background` block carries rows drawn from the training
//! cohort, in model feature order, for attribution reference sets.

use crate::models::classifier::{Classifier, ModelSchema};
use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NodeDocument {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct TreeDocument {
    nodes: Vec<NodeDocument>,
}

#[derive(Debug, Clone, Deserialize)]
struct ForestDocument {
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    #[serde(default)]
    classes: Option<Vec<i64>>,
    n_features: usize,
    trees: Vec<TreeDocument>,
    #[serde(default)]
    background: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Normalized class distribution
    Leaf(Vec<f64>),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_document(doc: TreeDocument, n_features: usize, n_classes: &mut Option<usize>) -> Result<Self> {
        if doc.nodes.is_empty() {
            bail!("tree has no nodes");
        }

        let len = doc.nodes.len();
        let mut nodes = Vec::with_capacity(len);

        for (index, node) in doc.nodes.into_iter().enumerate() {
            match node {
                NodeDocument::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        bail!("node {} splits on feature {} of {}", index, feature, n_features);
                    }
                    if !threshold.is_finite() {
                        bail!("node {} has a non-finite threshold", index);
                    }
                    // Children after their parent keeps every traversal finite
                    for child in [left, right] {
                        if child <= index || child >= len {
                            bail!("node {} has invalid child index {}", index, child);
                        }
                    }
                    nodes.push(Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    });
                }
                NodeDocument::Leaf { value } => {
                    match n_classes {
                        Some(n) if *n != value.len() => {
                            bail!("leaf {} has {} class weights, expected {}", index, value.len(), n)
                        }
                        None => *n_classes = Some(value.len()),
                        _ => {}
                    }
                    let total: f64 = value.iter().sum();
                    if value.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
                        bail!("leaf {} has invalid class weights", index);
                    }
                    nodes.push(Node::Leaf(value.iter().map(|w| w / total).collect()));
                }
            }
        }

        Ok(Self { nodes })
    }

    fn leaf(&self, features: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf(distribution) => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Random forest averaging the class distributions of its trees
#[derive(Debug, Clone)]
pub struct RandomForest {
    schema: ModelSchema,
    trees: Vec<Tree>,
    n_classes: usize,
}

impl RandomForest {
    /// Parse and validate a forest document
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: ForestDocument = serde_json::from_str(json).context("invalid forest document")?;
        Self::from_document(doc)
    }

    /// Build a forest from an already parsed JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let doc: ForestDocument = serde_json::from_value(value).context("invalid forest document")?;
        Self::from_document(doc)
    }

    fn from_document(doc: ForestDocument) -> Result<Self> {
        if doc.n_features == 0 {
            bail!("forest declares zero features");
        }
        if doc.trees.is_empty() {
            bail!("forest has no trees");
        }

        let schema = ModelSchema {
            feature_names: doc.feature_names,
            classes: doc.classes,
            n_features: Some(doc.n_features),
            background: doc.background,
        };
        schema.validate()?;

        let mut n_classes = None;
        let trees = doc
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, tree)| {
                Tree::from_document(tree, doc.n_features, &mut n_classes).with_context(|| format!("tree {}", i))
            })
            .collect::<Result<Vec<_>>>()?;

        let n_classes = n_classes.context("forest has no leaves")?;
        if let Some(classes) = &schema.classes {
            if classes.len() != n_classes {
                bail!("forest declares {} classes but leaves carry {}", classes.len(), n_classes);
            }
        }

        Ok(Self {
            schema,
            trees,
            n_classes,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        self.schema.check_width(features)?;

        let mut probabilities = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, leaf) in probabilities.iter_mut().zip(tree.leaf(features)) {
                *p += leaf;
            }
        }

        let count = self.trees.len() as f64;
        for p in &mut probabilities {
            *p /= count;
        }
        Ok(probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stump_forest() -> serde_json::Value {
        json!({
            "feature_names": ["年龄", "CEA"],
            "classes": [0, 1],
            "n_features": 2,
            "trees": [
                {"nodes": [
                    {"feature": 0, "threshold": 60.0, "left": 1, "right": 2},
                    {"value": [9.0, 1.0]},
                    {"value": [3.0, 7.0]}
                ]},
                {"nodes": [
                    {"feature": 1, "threshold": 5.0, "left": 1, "right": 2},
                    {"value": [4.0, 1.0]},
                    {"value": [1.0, 4.0]}
                ]}
            ]
        })
    }

    #[test]
    fn test_predict_proba_averages_trees() {
        let forest = RandomForest::from_value(stump_forest()).unwrap();
        assert_eq!(forest.tree_count(), 2);

        // young, low CEA: (0.1 + 0.2) / 2
        let p = forest.predict_proba(&[40.0, 3.0]).unwrap();
        assert!((p[1] - 0.15).abs() < 1e-12);
        assert!((p[0] + p[1] - 1.0).abs() < 1e-12);

        // threshold is inclusive on the left branch
        let p = forest.predict_proba(&[60.0, 5.0]).unwrap();
        assert!((p[1] - 0.15).abs() < 1e-12);

        // old, high CEA: (0.7 + 0.8) / 2
        let p = forest.predict_proba(&[70.0, 10.0]).unwrap();
        assert!((p[1] - 0.75).abs() < 1e-12);
        assert_eq!(forest.predict(&[70.0, 10.0]).unwrap(), 1);
        assert_eq!(forest.predict(&[40.0, 3.0]).unwrap(), 0);
    }

    #[test]
    fn test_schema_is_exposed() {
        let forest = RandomForest::from_value(stump_forest()).unwrap();
        let schema = forest.schema();
        assert_eq!(
            schema.feature_names.as_deref(),
            Some(&["年龄".to_string(), "CEA".to_string()][..])
        );
        assert_eq!(schema.classes, Some(vec![0, 1]));
    }

    #[test]
    fn test_wrong_width_is_an_error() {
        let forest = RandomForest::from_value(stump_forest()).unwrap();
        assert!(forest.predict_proba(&[40.0]).is_err());
    }

    #[test]
    fn test_rejects_backward_child_reference() {
        let doc = json!({
            "n_features": 1,
            "trees": [{"nodes": [
                {"feature": 0, "threshold": 1.0, "left": 0, "right": 1},
                {"value": [1.0, 1.0]}
            ]}]
        });
        let err = RandomForest::from_value(doc).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid child index"));
    }

    #[test]
    fn test_rejects_out_of_range_feature() {
        let doc = json!({
            "n_features": 1,
            "trees": [{"nodes": [
                {"feature": 3, "threshold": 1.0, "left": 1, "right": 2},
                {"value": [1.0, 1.0]},
                {"value": [1.0, 1.0]}
            ]}]
        });
        assert!(RandomForest::from_value(doc).is_err());
    }

    #[test]
    fn test_rejects_inconsistent_leaf_widths() {
        let doc = json!({
            "n_features": 1,
            "trees": [{"nodes": [
                {"feature": 0, "threshold": 1.0, "left": 1, "right": 2},
                {"value": [1.0, 1.0]},
                {"value": [1.0, 1.0, 1.0]}
            ]}]
        });
        assert!(RandomForest::from_value(doc).is_err());
    }

    #[test]
    fn test_rejects_duplicate_feature_names() {
        let mut doc = stump_forest();
        doc["feature_names"] = json!(["年龄", "年龄"]);
        let err = RandomForest::from_value(doc).unwrap_err();
        assert!(format!("{:#}", err).contains("declared more than once"));
    }

    #[test]
    fn test_background_block_is_validated() {
        let mut doc = stump_forest();
        doc["background"] = json!([[55.0, 3.0], [72.0, 9.5]]);
        let forest = RandomForest::from_value(doc.clone()).unwrap();
        assert_eq!(forest.schema().background.as_ref().map(Vec::len), Some(2));

        doc["background"] = json!([[55.0, 3.0], [72.0]]);
        let err = RandomForest::from_value(doc).unwrap_err();
        assert!(format!("{:#}", err).contains("background row 1"));
    }

    #[test]
    fn test_rejects_empty_forest_and_bad_json() {
        assert!(RandomForest::from_value(json!({"n_features": 2, "trees": []})).is_err());
        assert!(RandomForest::from_json("not json").is_err());
    }
}
