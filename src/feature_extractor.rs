//! Feature derivation for batch screening.
//!
//! Parses transaction timestamps into a numeric time axis and validates the
//! record invariants the downstream stages rely on. The outlier model only
//! sees real-valued vectors, so every record becomes `[amount, numeric_time]`.

use crate::config::MalformedPolicy;
use crate::error::{PipelineError, Result};
use crate::types::labeled::{DerivedTransaction, RejectedRecord};
use crate::types::transaction::Transaction;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Number of model features per record
pub const FEATURE_COUNT: usize = 2;

/// Feature deriver output
#[derive(Debug, Clone, Default)]
pub struct DerivedBatch {
    pub records: Vec<DerivedTransaction>,
    /// Records dropped under [`MalformedPolicy::Skip`]
    pub rejected: Vec<RejectedRecord>,
}

impl DerivedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn amounts(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.amount).collect()
    }
}

/// Turns raw transactions into derived records.
pub struct FeatureExtractor {
    policy: MalformedPolicy,
}

impl FeatureExtractor {
    pub fn new(policy: MalformedPolicy) -> Self {
        Self { policy }
    }

    /// Derive features for a whole batch, preserving order.
    ///
    /// Under [`MalformedPolicy::Abort`] the first bad record fails the batch.
    pub fn derive(&self, transactions: Vec<Transaction>) -> Result<DerivedBatch> {
        let mut batch = DerivedBatch {
            records: Vec::with_capacity(transactions.len()),
            rejected: Vec::new(),
        };
        let mut seen: HashSet<String> = HashSet::with_capacity(transactions.len());

        for tx in transactions {
            let outcome = if seen.contains(&tx.id) {
                Err(PipelineError::malformed(&tx.id, "duplicate transaction id"))
            } else {
                self.derive_one(&tx)
            };

            match outcome {
                Ok(derived) => {
                    seen.insert(derived.id.clone());
                    batch.records.push(derived);
                }
                Err(PipelineError::MalformedRecord { record_id, reason })
                    if self.policy == MalformedPolicy::Skip =>
                {
                    warn!(transaction_id = %record_id, reason = %reason, "Skipping malformed record");
                    batch.rejected.push(RejectedRecord { record_id, reason });
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            derived = batch.records.len(),
            rejected = batch.rejected.len(),
            "Feature derivation complete"
        );

        Ok(batch)
    }

    /// Derive features for a single record.
    pub fn derive_one(&self, tx: &Transaction) -> Result<DerivedTransaction> {
        if !tx.amount.is_finite() || tx.amount < 0.0 {
            return Err(PipelineError::malformed(
                &tx.id,
                format!("amount must be a non-negative number, got {}", tx.amount),
            ));
        }

        let timestamp = parse_timestamp(&tx.created_at).ok_or_else(|| {
            PipelineError::malformed(&tx.id, format!("invalid timestamp '{}'", tx.created_at))
        })?;

        Ok(DerivedTransaction {
            id: tx.id.clone(),
            timestamp,
            amount: tx.amount,
            source_account: tx.source_account.clone(),
            destination_account: tx.destination_account.clone(),
            numeric_time: numeric_time(&timestamp),
        })
    }

    /// Model input vector for a derived record.
    ///
    /// Order matches [`FeatureExtractor::feature_names`].
    pub fn features(&self, record: &DerivedTransaction) -> [f64; FEATURE_COUNT] {
        [record.amount, record.numeric_time]
    }

    /// Model input matrix for a derived batch
    pub fn feature_matrix(&self, batch: &DerivedBatch) -> Vec<[f64; FEATURE_COUNT]> {
        batch.records.iter().map(|r| self.features(r)).collect()
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn feature_names(&self) -> [&'static str; FEATURE_COUNT] {
        ["amount", "numeric_time"]
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(MalformedPolicy::default())
    }
}

/// Parse RFC 3339, or a naive ISO-8601 timestamp interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Seconds since the Unix epoch, microsecond precision
pub fn numeric_time(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}
