//! Transaction sources: seeded synthetic batches and persisted batch files

use crate::config::{SourceConfig, SourceKind};
use crate::error::{PipelineError, Result};
use crate::types::transaction::Transaction;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::info;

/// Produces one finite, ordered batch of transactions
#[async_trait]
pub trait TransactionSource: Send {
    /// Fetch the batch
    async fn fetch(&mut self) -> Result<Vec<Transaction>>;

    /// Name used in logs and errors
    fn name(&self) -> &str;
}

/// Build the source described by the configuration
pub fn from_config(config: &SourceConfig) -> Box<dyn TransactionSource> {
    match config.kind {
        SourceKind::Synthetic => {
            let mut source = SyntheticSource::new(config.count, config.seed)
                .with_suspicious_rate(config.suspicious_rate);
            if let Some(base_time) = config.base_time {
                source = source.with_base_time(base_time);
            }
            Box::new(source)
        }
        SourceKind::File => Box::new(JsonFileSource::new(&config.path)),
    }
}

/// Seeded generator of ledger-style transactions.
///
/// Ordinary records have amounts uniform in `[0.01, 1000)` rounded to cents
/// and timestamps up to 10,000 seconds before the base time. A configurable
/// fraction is drawn from a suspicious profile: either a micro-transfer
/// below 1.0 or a large transfer in `[1000, 10000)`.
pub struct SyntheticSource {
    count: usize,
    seed: u64,
    base_time: DateTime<Utc>,
    suspicious_rate: f64,
}

impl SyntheticSource {
    pub fn new(count: usize, seed: u64) -> Self {
        Self {
            count,
            seed,
            base_time: Utc::now(),
            suspicious_rate: 0.0,
        }
    }

    /// Anchor timestamps to a fixed instant instead of the current time
    pub fn with_base_time(mut self, base_time: DateTime<Utc>) -> Self {
        self.base_time = base_time;
        self
    }

    pub fn with_suspicious_rate(mut self, rate: f64) -> Self {
        self.suspicious_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Generate the batch without going through the async contract
    pub fn generate(&self) -> Vec<Transaction> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.count)
            .map(|i| {
                let offset = Duration::seconds(rng.gen_range(0..=10_000));
                let created_at = (self.base_time - offset)
                    .to_rfc3339_opts(SecondsFormat::Micros, true);

                let amount = if rng.gen_bool(self.suspicious_rate) {
                    if rng.gen_bool(0.5) {
                        rng.gen_range(0.01..0.99)
                    } else {
                        rng.gen_range(1_000.0..10_000.0)
                    }
                } else {
                    rng.gen_range(0.01..1_000.0)
                };

                Transaction {
                    id: format!("tx_{}", i),
                    created_at,
                    amount: round_cents(amount),
                    source_account: account(&mut rng),
                    destination_account: account(&mut rng),
                }
            })
            .collect()
    }
}

#[async_trait]
impl TransactionSource for SyntheticSource {
    async fn fetch(&mut self) -> Result<Vec<Transaction>> {
        let batch = self.generate();
        info!(count = batch.len(), seed = self.seed, "Generated synthetic batch");
        Ok(batch)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn account(rng: &mut StdRng) -> String {
    format!("G{}", rng.gen_range(1_000_000..=9_999_999))
}

/// Reads a persisted batch: a JSON array, or one JSON object per line
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn failure(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::Source {
            source_name: format!("file:{}", self.path.display()),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl TransactionSource for JsonFileSource {
    async fn fetch(&mut self) -> Result<Vec<Transaction>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.failure(e))?;

        let batch = parse_batch(&content).map_err(|e| self.failure(e))?;
        info!(
            count = batch.len(),
            path = %self.path.display(),
            "Loaded persisted batch"
        );
        Ok(batch)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Parse a JSON array of transactions, falling back to JSON lines
pub fn parse_batch(content: &str) -> std::result::Result<Vec<Transaction>, serde_json::Error> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content);
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Write a batch as a pretty JSON array, for later re-runs through [`JsonFileSource`]
pub async fn persist_batch(path: impl AsRef<Path>, batch: &[Transaction]) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(batch)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
