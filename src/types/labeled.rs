//! Per-stage columns and the final labeled batch
//!
//! Each stage appends to the record rather than rewriting it: the feature
//! deriver produces [`DerivedTransaction`], the rule engine and anomaly model
//! produce [`RuleFlags`] and [`OutlierVerdict`] columns, and the combiner folds
//! them into [`LabeledTransaction`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction with parsed time features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTransaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub source_account: String,
    pub destination_account: String,
    /// Seconds since the Unix epoch
    pub numeric_time: f64,
}

/// Rule engine output for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleFlags {
    /// Amount below the micro-transfer threshold
    pub micro_flag: bool,
    /// Amount above the batch quantile
    pub large_flag: bool,
}

/// Anomaly model output for one record
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OutlierVerdict {
    pub is_outlier: bool,
    /// Isolation score in (0, 1], absent when the model did not fit
    pub score: Option<f64>,
}

/// Record dropped by the feature deriver under the skip policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub record_id: String,
    pub reason: String,
}

/// Transaction carrying every derived column and the final label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledTransaction {
    #[serde(flatten)]
    pub features: DerivedTransaction,
    pub micro_flag: bool,
    pub large_flag: bool,
    pub is_outlier: bool,
    pub anomaly_score: Option<f64>,
    pub is_suspicious: bool,
}

impl LabeledTransaction {
    pub fn id(&self) -> &str {
        &self.features.id
    }

    pub fn amount(&self) -> f64 {
        self.features.amount
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledBatch {
    /// Labeled records in source order
    pub records: Vec<LabeledTransaction>,
    /// Amount quantile used for `large_flag`, absent for an empty batch
    pub large_threshold: Option<f64>,
    /// Isolation score cut-off, absent when the model did not fit
    pub outlier_threshold: Option<f64>,
    pub model_fitted: bool,
    pub rejected: Vec<RejectedRecord>,
}

impl LabeledBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records labeled suspicious, in source order
    pub fn suspicious(&self) -> impl Iterator<Item = &LabeledTransaction> {
        self.records.iter().filter(|r| r.is_suspicious)
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious().count()
    }

    /// The `is_suspicious` column
    pub fn labels(&self) -> Vec<bool> {
        self.records.iter().map(|r| r.is_suspicious).collect()
    }
}
