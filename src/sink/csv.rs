//! Delimited-text sink: full table plus suspicious subset

use crate::error::{PipelineError, Result};
use crate::sink::Sink;
use crate::types::labeled::{LabeledBatch, LabeledTransaction};
use async_trait::async_trait;
use chrono::SecondsFormat;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Column header shared by both tables
pub const HEADER: &str = "id,timestamp,amount,source_account,destination_account,numeric_time,micro_transfer,large_transfer,anomaly_score,is_outlier,is_suspicious";

/// Writes `all_transactions.csv` and `suspicious_transactions.csv` style tables
pub struct CsvSink {
    all_path: PathBuf,
    suspicious_path: PathBuf,
}

impl CsvSink {
    pub fn new(output_dir: impl AsRef<Path>, all_file: &str, suspicious_file: &str) -> Self {
        let dir = output_dir.as_ref();
        Self {
            all_path: dir.join(all_file),
            suspicious_path: dir.join(suspicious_file),
        }
    }

    pub fn all_path(&self) -> &Path {
        &self.all_path
    }

    pub fn suspicious_path(&self) -> &Path {
        &self.suspicious_path
    }

    async fn write_table<'a, I>(&self, path: &Path, rows: I) -> Result<usize>
    where
        I: Iterator<Item = &'a LabeledTransaction>,
    {
        let (content, count) = render_table(rows);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::sink(self.name(), format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| PipelineError::sink(self.name(), format!("{}: {}", path.display(), e)))?;

        Ok(count)
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn persist(&self, batch: &LabeledBatch) -> Result<()> {
        let all = self.write_table(&self.all_path, batch.records.iter()).await?;
        let suspicious = self
            .write_table(&self.suspicious_path, batch.suspicious())
            .await?;

        info!(
            all = all,
            suspicious = suspicious,
            all_path = %self.all_path.display(),
            suspicious_path = %self.suspicious_path.display(),
            "Saved transaction tables"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Render rows under [`HEADER`], returning the text and row count
pub fn render_table<'a>(rows: impl Iterator<Item = &'a LabeledTransaction>) -> (String, usize) {
    let mut out = String::from(HEADER);
    out.push('\n');
    let mut count = 0;

    for row in rows {
        let f = &row.features;
        let score = row
            .anomaly_score
            .map(|s| format!("{:.6}", s))
            .unwrap_or_default();

        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{},{},{:.6},{},{},{},{},{}",
            escape(&f.id),
            f.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            f.amount,
            escape(&f.source_account),
            escape(&f.destination_account),
            f.numeric_time,
            row.micro_flag,
            row.large_flag,
            score,
            row.is_outlier,
            row.is_suspicious,
        );
        count += 1;
    }

    (out, count)
}

/// Quote a field when it contains a delimiter, quote or line break
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
