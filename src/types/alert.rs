//! Suspicion report published for each flagged transaction

use crate::types::labeled::LabeledTransaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Isolation score cut-offs for risk levels
///
/// Isolation scores sit near 0.5 for ordinary records and approach 1.0 for
/// records isolated in very few splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.55,
            high: 0.65,
            critical: 0.75,
        }
    }
}

/// Signal that caused a transaction to be flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    MicroTransfer,
    LargeTransfer,
    IsolationForest,
}

/// Review status of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Flagged,
}

/// Report document for one suspicious transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionReport {
    /// Unique report identifier
    pub report_id: String,

    pub transaction_id: String,

    pub amount: f64,

    /// When the transaction occurred
    pub timestamp: DateTime<Utc>,

    pub source_account: String,

    pub destination_account: String,

    /// Signals that fired
    pub reasons: Vec<SuspicionReason>,

    /// Human-readable rule conditions, e.g. `AMOUNT > 947.12`
    pub rules_triggered: Vec<String>,

    /// Isolation score when the model fitted
    pub detection_score: Option<f64>,

    /// `isolation_forest` when the model flagged the record, otherwise `rules`
    pub detection_method: String,

    pub risk_level: RiskLevel,

    pub status: ReportStatus,

    /// Report generation time
    pub created_at: DateTime<Utc>,
}

impl SuspicionReport {
    /// Build a report from a labeled transaction
    ///
    /// `micro_threshold` and `large_threshold` only feed the rule strings.
    pub fn from_labeled(
        record: &LabeledTransaction,
        micro_threshold: f64,
        large_threshold: Option<f64>,
        risk_thresholds: &RiskLevelThresholds,
    ) -> Self {
        let mut reasons = Vec::new();
        let mut rules_triggered = Vec::new();

        if record.micro_flag {
            reasons.push(SuspicionReason::MicroTransfer);
            rules_triggered.push(format!("AMOUNT < {:.2}", micro_threshold));
        }
        if record.large_flag {
            reasons.push(SuspicionReason::LargeTransfer);
            if let Some(threshold) = large_threshold {
                rules_triggered.push(format!("AMOUNT > {:.2}", threshold));
            }
        }
        if record.is_outlier {
            reasons.push(SuspicionReason::IsolationForest);
        }

        let detection_method = if record.is_outlier {
            "isolation_forest"
        } else {
            "rules"
        };

        // Rule-only hits on an unfitted model still warrant review
        let risk_level = match record.anomaly_score {
            Some(score) => RiskLevel::from_score(score, risk_thresholds),
            None => RiskLevel::Medium,
        };

        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: record.features.id.clone(),
            amount: record.features.amount,
            timestamp: record.features.timestamp,
            source_account: record.features.source_account.clone(),
            destination_account: record.features.destination_account.clone(),
            reasons,
            rules_triggered,
            detection_score: record.anomaly_score,
            detection_method: detection_method.to_string(),
            risk_level,
            status: ReportStatus::Flagged,
            created_at: Utc::now(),
        }
    }
}
