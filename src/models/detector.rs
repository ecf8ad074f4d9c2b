//! Batch outlier detection: fit on the batch, score it, apply contamination

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::feature_extractor::FEATURE_COUNT;
use crate::models::isolation_forest::IsolationForest;
use crate::rules::quantile;
use crate::types::labeled::OutlierVerdict;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Anomaly model output for a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlierColumn {
    /// One entry per record, in batch order
    pub verdicts: Vec<OutlierVerdict>,
    /// Score cut-off, absent when the model did not fit
    pub threshold: Option<f64>,
    pub fitted: bool,
}

impl OutlierColumn {
    /// Every record normal, no scores
    fn unfitted(len: usize) -> Self {
        Self {
            verdicts: vec![OutlierVerdict::default(); len],
            threshold: None,
            fitted: false,
        }
    }

    pub fn outlier_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_outlier).count()
    }
}

/// Isolation forest detector with a contamination-based decision threshold
#[derive(Debug, Clone)]
pub struct OutlierDetector {
    contamination: f64,
    ensemble_size: usize,
    max_samples: usize,
    random_seed: u64,
    min_samples: usize,
    strict: bool,
}

impl OutlierDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            contamination: config.contamination,
            ensemble_size: config.ensemble_size,
            max_samples: config.max_samples,
            random_seed: config.random_seed,
            min_samples: config.min_samples_for_model,
            strict: config.strict_model,
        }
    }

    /// Fit and score `points` in one pass.
    ///
    /// Batches below the minimum sample count, or with no variation in any
    /// feature, label every record normal. In strict mode they fail with
    /// [`PipelineError::InsufficientData`] instead.
    pub fn detect(&self, points: &[[f64; FEATURE_COUNT]]) -> Result<OutlierColumn> {
        if points.is_empty() {
            return Ok(OutlierColumn::default());
        }

        if points.len() < self.min_samples || !has_variation(points) {
            if self.strict {
                return Err(PipelineError::InsufficientData {
                    available: points.len(),
                    required: self.min_samples,
                });
            }
            warn!(
                records = points.len(),
                min_samples = self.min_samples,
                "Batch too small or constant for the anomaly model, labeling all records normal"
            );
            return Ok(OutlierColumn::unfitted(points.len()));
        }

        let mut rng = StdRng::seed_from_u64(self.random_seed);
        let forest =
            IsolationForest::fit(points, self.ensemble_size, self.max_samples, &mut rng);
        let scores = forest.score_all(points);

        // Non-empty, so the quantile exists
        let threshold = quantile(&scores, 1.0 - self.contamination).unwrap_or(f64::INFINITY);

        let verdicts: Vec<OutlierVerdict> = scores
            .iter()
            .map(|&score| OutlierVerdict {
                is_outlier: score > threshold,
                score: Some(score),
            })
            .collect();

        let column = OutlierColumn {
            verdicts,
            threshold: Some(threshold),
            fitted: true,
        };

        debug!(
            trees = forest.tree_count(),
            sample_size = forest.sample_size(),
            threshold = threshold,
            "Isolation forest scored batch"
        );
        info!(
            records = points.len(),
            outliers = column.outlier_count(),
            contamination = self.contamination,
            "Anomaly model complete"
        );

        Ok(column)
    }
}

fn has_variation(points: &[[f64; FEATURE_COUNT]]) -> bool {
    let first = points[0];
    points
        .iter()
        .any(|p| p.iter().zip(first.iter()).any(|(a, b)| a != b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn detector(contamination: f64, strict: bool) -> OutlierDetector {
        OutlierDetector::new(&PipelineConfig {
            contamination,
            strict_model: strict,
            ..PipelineConfig::default()
        })
    }

    fn random_points(n: usize, seed: u64) -> Vec<[f64; FEATURE_COUNT]> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(0.01..1000.0),
                    1_700_000_000.0 - rng.gen_range(0.0..10_000.0),
                ]
            })
            .collect()
    }

    #[test]
    fn test_contamination_sets_outlier_fraction() {
        let points = random_points(200, 11);
        let column = detector(0.05, false).detect(&points).unwrap();

        assert!(column.fitted);
        assert_eq!(column.verdicts.len(), 200);
        let count = column.outlier_count();
        assert!((5..=15).contains(&count), "flagged {} outliers", count);
    }

    #[test]
    fn test_verdicts_follow_threshold() {
        let points = random_points(120, 5);
        let column = detector(0.1, false).detect(&points).unwrap();
        let threshold = column.threshold.unwrap();

        for verdict in &column.verdicts {
            assert_eq!(verdict.is_outlier, verdict.score.unwrap() > threshold);
        }
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let points = random_points(150, 23);
        let a = detector(0.05, false).detect(&points).unwrap();
        let b = detector(0.05, false).detect(&points).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_small_batch_degrades() {
        let points = random_points(3, 1);
        let column = detector(0.05, false).detect(&points).unwrap();

        assert!(!column.fitted);
        assert_eq!(column.threshold, None);
        assert!(column
            .verdicts
            .iter()
            .all(|v| !v.is_outlier && v.score.is_none()));
    }

    #[test]
    fn test_constant_batch_degrades() {
        let points = vec![[5.0, 1_700_000_000.0]; 40];
        let column = detector(0.05, false).detect(&points).unwrap();

        assert!(!column.fitted);
        assert_eq!(column.outlier_count(), 0);
    }

    #[test]
    fn test_strict_mode_requires_fit() {
        let points = random_points(4, 2);
        match detector(0.05, true).detect(&points) {
            Err(PipelineError::InsufficientData {
                available,
                required,
            }) => {
                assert_eq!(available, 4);
                assert_eq!(required, 10);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch() {
        let column = detector(0.05, true).detect(&[]).unwrap();
        assert!(column.verdicts.is_empty());
    }
}
