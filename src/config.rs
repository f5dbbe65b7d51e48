//! Configuration management for the survival risk service

use crate::types::feature::{default_features, FeatureCatalog, FeatureSpec};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "RISK_CONFIG";

/// Serialization format of the model artifact
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// JSON random forest tree dump
    #[default]
    Forest,
    /// ONNX graph (requires the `onnx` feature)
    Onnx,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub explainer: ExplainerConfig,
    pub nats: NatsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    /// Feature declaration table
    pub features: Vec<FeatureSpec>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path of the trained classifier artifact
    pub path: String,
    pub format: ModelFormat,
    /// Class label of the adverse outcome, expected at probability index 1
    pub adverse_class_label: i64,
    /// Number of threads for ONNX inference
    pub onnx_threads: usize,
}

/// Attribution configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// Compute attributions at all
    pub enabled: bool,
    /// Contributions shown in the waterfall
    pub max_display: usize,
    /// Largest feature count solved by full coalition enumeration
    pub max_exact_features: usize,
    /// Permutations drawn above `max_exact_features`
    pub permutation_samples: usize,
    /// Seed for permutation sampling
    pub seed: u64,
    /// Reference rows, values in feature declaration order. When empty the
    /// cohort shipped with the model artifact is used
    pub background: Vec<Vec<f64>>,
}

/// NATS request/reply endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub enabled: bool,
    /// NATS server URL
    pub url: String,
    /// Subject for incoming assessment requests
    pub request_subject: String,
    /// Queue group shared by service replicas
    pub queue_group: String,
    /// Concurrent requests in flight
    pub workers: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Interval of the logged summary, 0 disables it
    pub report_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from `RISK_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, then apply `RISK__*` overrides.
    /// A missing file leaves the defaults in place.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("RISK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        let catalog = self.catalog()?;
        for (i, row) in self.explainer.background.iter().enumerate() {
            if row.len() != catalog.len() {
                anyhow::bail!(
                    "explainer.background row {} has {} values, expected {}",
                    i,
                    row.len(),
                    catalog.len()
                );
            }
        }
        if self.nats.enabled && self.nats.workers == 0 {
            anyhow::bail!("nats.workers must be at least 1");
        }
        if self.explainer.permutation_samples == 0 {
            anyhow::bail!("explainer.permutation_samples must be at least 1");
        }
        if self.model.path.is_empty() {
            anyhow::bail!("model.path must be set");
        }
        Ok(())
    }

    /// Validated feature catalog
    pub fn catalog(&self) -> Result<FeatureCatalog> {
        FeatureCatalog::new(self.features.clone()).context("Invalid feature declaration table")
    }

    /// Socket address string for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            explainer: ExplainerConfig::default(),
            nats: NatsConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            features: default_features(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/gastric_rf.json".to_string(),
            format: ModelFormat::Forest,
            adverse_class_label: 1,
            onnx_threads: 1,
        }
    }
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_display: 7,
            max_exact_features: 10,
            permutation_samples: 256,
            seed: 42,
            background: Vec::new(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
            request_subject: "risk.assess".to_string(),
            queue_group: "risk-service".to_string(),
            workers: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.model.format, ModelFormat::Forest);
        assert_eq!(config.model.adverse_class_label, 1);
        assert_eq!(config.explainer.max_display, 7);
        assert_eq!(config.features.len(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from_path("/nonexistent/config.toml").unwrap();
        assert_eq!(config.model.path, "models/gastric_rf.json");
        assert_eq!(config.catalog().unwrap().len(), 7);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[server]
port = 9090

[model]
path = "models/other.json"

[explainer]
permutation_samples = 64
background = [[60.0, 0.0]]

[[features]]
name = "年龄"
default = 60
unit = "岁"
kind = {{ type = "numerical", min = 25, max = 90 }}

[[features]]
name = "淋巴血管侵犯"
default = 0
kind = {{ type = "categorical", options = [{{ value = 0, label = "否" }}, {{ value = 1, label = "是" }}] }}
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.path, "models/other.json");
        assert_eq!(config.explainer.permutation_samples, 64);
        assert_eq!(config.explainer.background.len(), 1);
        assert_eq!(config.explainer.background[0], vec![60.0, 0.0]);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.names(), vec!["年龄".to_string(), "淋巴血管侵犯".to_string()]);
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = AppConfig::load_from_path(path).unwrap();
        // The artifact's cohort is the reference set out of the box
        assert!(config.explainer.background.is_empty());
        assert!(!config.nats.enabled);
    }

    #[test]
    fn test_background_width_checked() {
        let mut config = AppConfig::default();
        config.explainer.background = vec![vec![1.0, 2.0]];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_catalog_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[[features]]
name = "年龄"
default = 100
kind = {{ type = "numerical", min = 25, max = 90 }}
"#
        )
        .unwrap();

        assert!(AppConfig::load_from_path(file.path()).is_err());
    }
}
