//! Union of rule and model signals into the final suspicion label

use crate::error::{PipelineError, Result};
use crate::models::detector::OutlierColumn;
use crate::rules::RuleColumns;
use crate::types::labeled::{DerivedTransaction, LabeledTransaction};

/// Combines rule flags and outlier verdicts per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspicionCombiner;

impl SuspicionCombiner {
    pub fn new() -> Self {
        Self
    }

    /// `is_suspicious = is_outlier || micro_flag || large_flag`
    pub fn is_suspicious(is_outlier: bool, micro_flag: bool, large_flag: bool) -> bool {
        is_outlier || micro_flag || large_flag
    }

    /// Label every record. Both columns must cover the batch exactly.
    pub fn combine(
        &self,
        records: Vec<DerivedTransaction>,
        rules: &RuleColumns,
        outliers: &OutlierColumn,
    ) -> Result<Vec<LabeledTransaction>> {
        check_coverage(&records, rules.flags.len(), "rule flags")?;
        check_coverage(&records, outliers.verdicts.len(), "outlier verdict")?;

        let labeled = records
            .into_iter()
            .zip(rules.flags.iter())
            .zip(outliers.verdicts.iter())
            .map(|((features, flags), verdict)| LabeledTransaction {
                features,
                micro_flag: flags.micro_flag,
                large_flag: flags.large_flag,
                is_outlier: verdict.is_outlier,
                anomaly_score: verdict.score,
                is_suspicious: Self::is_suspicious(
                    verdict.is_outlier,
                    flags.micro_flag,
                    flags.large_flag,
                ),
            })
            .collect();

        Ok(labeled)
    }
}

fn check_coverage(
    records: &[DerivedTransaction],
    column_len: usize,
    missing: &'static str,
) -> Result<()> {
    if column_len == records.len() {
        return Ok(());
    }
    let record_id = records
        .get(column_len)
        .map(|r| r.id.clone())
        .unwrap_or_else(|| format!("<{} extra entries>", column_len - records.len()));
    Err(PipelineError::IncompleteFeatures { record_id, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::labeled::{OutlierVerdict, RuleFlags};
    use chrono::DateTime;

    fn record(id: &str, amount: f64) -> DerivedTransaction {
        DerivedTransaction {
            id: id.to_string(),
            timestamp: DateTime::from_timestamp(1_714_564_800, 0).unwrap(),
            amount,
            source_account: "G1111111".to_string(),
            destination_account: "G2222222".to_string(),
            numeric_time: 1_714_564_800.0,
        }
    }

    fn flags(micro: bool, large: bool) -> RuleFlags {
        RuleFlags {
            micro_flag: micro,
            large_flag: large,
        }
    }

    fn verdict(is_outlier: bool) -> OutlierVerdict {
        OutlierVerdict {
            is_outlier,
            score: Some(if is_outlier { 0.7 } else { 0.45 }),
        }
    }

    #[test]
    fn test_union_truth_table() {
        let cases = [
            (false, false, false),
            (true, false, false),
            (false, true, false),
            (false, false, true),
            (true, true, true),
        ];
        let records = (0..cases.len())
            .map(|i| record(&format!("tx_{}", i), 10.0))
            .collect();
        let rules = RuleColumns {
            flags: cases.iter().map(|&(m, l, _)| flags(m, l)).collect(),
            large_threshold: Some(100.0),
        };
        let outliers = OutlierColumn {
            verdicts: cases.iter().map(|&(_, _, o)| verdict(o)).collect(),
            threshold: Some(0.6),
            fitted: true,
        };

        let labeled = SuspicionCombiner::new()
            .combine(records, &rules, &outliers)
            .unwrap();

        let labels: Vec<bool> = labeled.iter().map(|r| r.is_suspicious).collect();
        assert_eq!(labels, vec![false, true, true, true, true]);
        assert_eq!(labeled[3].anomaly_score, Some(0.7));
    }

    #[test]
    fn test_missing_outlier_column() {
        let records = vec![record("tx_a", 1.0), record("tx_b", 2.0)];
        let rules = RuleColumns {
            flags: vec![flags(false, false); 2],
            large_threshold: Some(1.95),
        };
        let outliers = OutlierColumn {
            verdicts: vec![verdict(false)],
            threshold: None,
            fitted: false,
        };

        match SuspicionCombiner::new().combine(records, &rules, &outliers) {
            Err(PipelineError::IncompleteFeatures { record_id, missing }) => {
                assert_eq!(record_id, "tx_b");
                assert_eq!(missing, "outlier verdict");
            }
            other => panic!("expected IncompleteFeatures, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_rule_entries() {
        let rules = RuleColumns {
            flags: vec![flags(true, false)],
            large_threshold: None,
        };
        let result = SuspicionCombiner::new().combine(Vec::new(), &rules, &OutlierColumn::default());

        assert!(matches!(
            result,
            Err(PipelineError::IncompleteFeatures {
                missing: "rule flags",
                ..
            })
        ));
    }
}
