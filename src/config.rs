//! Configuration management for the flagging pipeline

use crate::error::PipelineError;
use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// What the feature deriver does with a record it cannot interpret
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the whole batch
    #[default]
    Abort,
    /// Drop the record and continue
    Skip,
}

/// Where the batch comes from
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Seeded synthetic generator
    #[default]
    Synthetic,
    /// Previously persisted batch (JSON array or JSON lines)
    File,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

/// Detection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Amounts strictly below this are micro-transfers
    pub micro_threshold: f64,
    /// Batch quantile above which amounts are large transfers, in (0, 1)
    pub large_quantile: f64,
    /// Expected outlier fraction, in (0, 1)
    pub contamination: f64,
    /// Seed for forest construction
    pub random_seed: u64,
    /// Number of isolation trees
    pub ensemble_size: usize,
    /// Records drawn per tree
    pub max_samples: usize,
    /// Below this batch size the model labels every record normal
    pub min_samples_for_model: usize,
    /// Fail instead of degrading when the model cannot fit
    pub strict_model: bool,
    pub on_malformed: MalformedPolicy,
    /// Isolation score cut-offs for report risk levels
    pub risk_levels: RiskLevelThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            micro_threshold: 1.0,
            large_quantile: 0.95,
            contamination: 0.05,
            random_seed: 42,
            ensemble_size: 100,
            max_samples: 256,
            min_samples_for_model: 10,
            strict_model: false,
            on_malformed: MalformedPolicy::Abort,
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject option values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.micro_threshold.is_finite() || self.micro_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "micro_threshold must be a non-negative number, got {}",
                self.micro_threshold
            )));
        }
        if !(self.large_quantile > 0.0 && self.large_quantile < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "large_quantile must be in (0, 1), got {}",
                self.large_quantile
            )));
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "contamination must be in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.ensemble_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "ensemble_size must be at least 1".to_string(),
            ));
        }
        if self.max_samples < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if self.min_samples_for_model < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "min_samples_for_model must be at least 2, got {}",
                self.min_samples_for_model
            )));
        }
        Ok(())
    }
}

/// Transaction source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Records to synthesize
    pub count: usize,
    /// Seed for synthetic generation
    pub seed: u64,
    /// Fraction of synthetic records drawn from the suspicious profile
    pub suspicious_rate: f64,
    /// Anchor for synthetic timestamps; the current time when unset
    pub base_time: Option<DateTime<Utc>>,
    /// Persisted batch for the file source
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            count: 200,
            seed: 7,
            suspicious_rate: 0.0,
            base_time: None,
            path: PathBuf::from("data/batch.json"),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Directory for the CSV tables
    pub output_dir: PathBuf,
    pub all_transactions_file: String,
    pub suspicious_transactions_file: String,
    /// Optional NATS alert publishing
    pub nats: Option<NatsConfig>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            all_transactions_file: "all_transactions.csv".to_string(),
            suspicious_transactions_file: "suspicious_transactions.csv".to_string(),
            nats: None,
        }
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for suspicion reports
    #[serde(default = "default_report_subject")]
    pub report_subject: String,
}

fn default_report_subject() -> String {
    "fraud.reports".to_string()
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

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, overlaid with `FLAGGING__*` variables
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FLAGGING").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app.pipeline
            .validate()
            .context("Invalid pipeline configuration")?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.micro_threshold, 1.0);
        assert_eq!(config.pipeline.large_quantile, 0.95);
        assert_eq!(config.pipeline.contamination, 0.05);
        assert_eq!(config.pipeline.on_malformed, MalformedPolicy::Abort);
        assert_eq!(config.source.kind, SourceKind::Synthetic);
        assert_eq!(config.source.count, 200);
        assert!(config.sink.nats.is_none());
        assert!(config.pipeline.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = PipelineConfig::default();
        config.contamination = 0.0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.large_quantile = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.min_samples_for_model = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
contamination = 0.1
on_malformed = "skip"

[source]
kind = "file"
path = "batches/monday.json"

[sink.nats]
url = "nats://localhost:4222"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.pipeline.contamination, 0.1);
        assert_eq!(config.pipeline.on_malformed, MalformedPolicy::Skip);
        assert_eq!(config.pipeline.ensemble_size, 100);
        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.source.path, PathBuf::from("batches/monday.json"));
        let nats = config.sink.nats.unwrap();
        assert_eq!(nats.report_subject, "fraud.reports");
        assert!(config.source.base_time.is_none());
    }

    #[test]
    fn test_load_synthetic_base_time() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[source]\nseed = 11\nbase_time = \"2024-06-01T12:00:00Z\""
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.source.seed, 11);
        assert_eq!(
            config.source.base_time,
            DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc))
        );
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\nlarge_quantile = 1.5").unwrap();

        assert!(AppConfig::load_from_path(file.path()).is_err());
    }
}
