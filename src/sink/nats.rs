//! NATS sink: one suspicion report per flagged transaction

use crate::error::{PipelineError, Result};
use crate::sink::Sink;
use crate::types::alert::{RiskLevelThresholds, SuspicionReport};
use crate::types::labeled::LabeledBatch;
use async_nats::Client;
use async_trait::async_trait;
use tracing::{debug, info};

/// Publishes suspicion reports to a NATS subject.
///
/// The client is owned by the caller; the producer only borrows a handle
/// for the duration of the run and flushes before reporting success.
#[derive(Clone)]
pub struct ReportProducer {
    client: Client,
    subject: String,
    micro_threshold: f64,
    risk_levels: RiskLevelThresholds,
}

impl ReportProducer {
    /// Create a new report producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            micro_threshold: 1.0,
            risk_levels: RiskLevelThresholds::default(),
        }
    }

    /// Rule parameters quoted in the reports
    pub fn with_rule_context(mut self, micro_threshold: f64, risk_levels: RiskLevelThresholds) -> Self {
        self.micro_threshold = micro_threshold;
        self.risk_levels = risk_levels;
        self
    }

    /// Build reports for the suspicious subset of a batch
    pub fn reports(&self, batch: &LabeledBatch) -> Vec<SuspicionReport> {
        batch
            .suspicious()
            .map(|record| {
                SuspicionReport::from_labeled(
                    record,
                    self.micro_threshold,
                    batch.large_threshold,
                    &self.risk_levels,
                )
            })
            .collect()
    }

    /// Publish a single report
    pub async fn publish(&self, report: &SuspicionReport) -> Result<()> {
        let payload =
            serde_json::to_vec(report).map_err(|e| PipelineError::sink(self.name(), e))?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| PipelineError::sink(self.name(), e))?;

        debug!(
            report_id = %report.report_id,
            transaction_id = %report.transaction_id,
            detection_score = ?report.detection_score,
            "Published suspicion report"
        );

        Ok(())
    }

    /// Publish reports in order, stopping at the first failure
    pub async fn publish_batch(&self, reports: &[SuspicionReport]) -> Result<()> {
        for report in reports {
            self.publish(report).await?;
        }
        self.client
            .flush()
            .await
            .map_err(|e| PipelineError::sink(self.name(), e))?;
        Ok(())
    }
}

#[async_trait]
impl Sink for ReportProducer {
    async fn persist(&self, batch: &LabeledBatch) -> Result<()> {
        let reports = self.reports(batch);
        self.publish_batch(&reports).await?;

        info!(
            subject = %self.subject,
            reports = reports.len(),
            "Published suspicion reports"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}

