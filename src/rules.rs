//! Threshold rules: micro-transfers and batch-relative large transfers

use crate::feature_extractor::DerivedBatch;
use crate::types::labeled::RuleFlags;
use tracing::debug;

/// Quantile with linear interpolation between closest ranks.
///
/// Sorts ascending, takes `h = (n - 1) * p` and interpolates between
/// `x[floor(h)]` and `x[floor(h) + 1]`. Returns `None` for an empty slice.
/// `p` is clamped to `[0, 1]`.
pub fn quantile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = h - lower as f64;

    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Rule engine output for a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleColumns {
    /// One entry per record, in batch order
    pub flags: Vec<RuleFlags>,
    /// Amount quantile computed from this batch
    pub large_threshold: Option<f64>,
}

impl RuleColumns {
    pub fn micro_count(&self) -> usize {
        self.flags.iter().filter(|f| f.micro_flag).count()
    }

    pub fn large_count(&self) -> usize {
        self.flags.iter().filter(|f| f.large_flag).count()
    }
}

/// Fixed and distribution-relative amount rules
#[derive(Debug, Clone)]
pub struct RuleEngine {
    micro_threshold: f64,
    large_quantile: f64,
}

impl RuleEngine {
    pub fn new(micro_threshold: f64, large_quantile: f64) -> Self {
        Self {
            micro_threshold,
            large_quantile,
        }
    }

    pub fn micro_threshold(&self) -> f64 {
        self.micro_threshold
    }

    pub fn large_quantile(&self) -> f64 {
        self.large_quantile
    }

    /// Amount strictly below the micro threshold
    pub fn is_micro(&self, amount: f64) -> bool {
        amount < self.micro_threshold
    }

    /// Evaluate both rules over the batch.
    ///
    /// The large threshold is recomputed from this batch on every call.
    pub fn evaluate(&self, batch: &DerivedBatch) -> RuleColumns {
        let amounts = batch.amounts();
        let large_threshold = quantile(&amounts, self.large_quantile);

        let flags = amounts
            .iter()
            .map(|&amount| RuleFlags {
                micro_flag: self.is_micro(amount),
                large_flag: large_threshold.is_some_and(|t| amount > t),
            })
            .collect();

        let columns = RuleColumns {
            flags,
            large_threshold,
        };

        debug!(
            records = amounts.len(),
            large_threshold = ?columns.large_threshold,
            micro = columns.micro_count(),
            large = columns.large_count(),
            "Rule evaluation complete"
        );

        columns
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(1.0, 0.95)
    }
}
