//! Run statistics and chart-ready aggregates for a labeled batch.

use crate::error::Stage;
use crate::types::labeled::LabeledBatch;
use std::time::Duration;
use tracing::info;

/// Number of bins in the suspicious-amount histogram
pub const HISTOGRAM_BINS: usize = 20;

/// Wall-clock time spent per stage
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    timings: Vec<(Stage, Duration)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.timings.push((stage, elapsed));
    }

    pub fn get(&self, stage: Stage) -> Option<Duration> {
        self.timings
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, d)| *d)
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Stage, Duration)> {
        self.timings.iter()
    }
}

/// Histogram over a closed value range
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Equal-width bins spanning the observed range. `None` when empty.
    pub fn from_values(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = (max - min) / bins as f64;

        let mut counts = vec![0u64; bins];
        for &v in values {
            let bin = if width > 0.0 {
                (((v - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }

        Some(Self { min, max, counts })
    }

    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }
}

/// Aggregates of one labeled batch, shaped for the charts downstream
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub suspicious: usize,
    pub micro_transfers: usize,
    pub large_transfers: usize,
    pub outliers: usize,
    pub rejected: usize,
    pub large_threshold: Option<f64>,
    pub outlier_threshold: Option<f64>,
    /// Isolation scores in ten 0.1-wide buckets
    pub score_buckets: [u64; 10],
    /// Amounts of suspicious records
    pub suspicious_amounts: Option<Histogram>,
}

impl BatchSummary {
    pub fn from_batch(batch: &LabeledBatch) -> Self {
        let mut score_buckets = [0u64; 10];
        for score in batch.records.iter().filter_map(|r| r.anomaly_score) {
            let bucket = ((score * 10.0) as usize).min(9);
            score_buckets[bucket] += 1;
        }

        let amounts: Vec<f64> = batch.suspicious().map(|r| r.amount()).collect();

        Self {
            total: batch.len(),
            suspicious: amounts.len(),
            micro_transfers: batch.records.iter().filter(|r| r.micro_flag).count(),
            large_transfers: batch.records.iter().filter(|r| r.large_flag).count(),
            outliers: batch.records.iter().filter(|r| r.is_outlier).count(),
            rejected: batch.rejected.len(),
            large_threshold: batch.large_threshold,
            outlier_threshold: batch.outlier_threshold,
            score_buckets,
            suspicious_amounts: Histogram::from_values(&amounts, HISTOGRAM_BINS),
        }
    }

    pub fn normal(&self) -> usize {
        self.total - self.suspicious
    }

    /// Suspicious share in percent
    pub fn suspicious_rate(&self) -> f64 {
        if self.total > 0 {
            (self.suspicious as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self, timings: &StageTimings) {
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          TRANSACTION FLAGGING PIPELINE - BATCH SUMMARY        ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions: {:>8}  │  Suspicious: {:>6} ({:>5.1}%)          ║",
            self.total,
            self.suspicious,
            self.suspicious_rate()
        );
        info!(
            "║ Normal:       {:>8}  │  Rejected:   {:>6}                   ║",
            self.normal(),
            self.rejected
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Micro transfers: {:>6}  Large transfers: {:>6}  Outliers: {:>6}",
            self.micro_transfers, self.large_transfers, self.outliers
        );
        if let Some(threshold) = self.large_threshold {
            info!("║ Large transfer threshold: {:.2}", threshold);
        }
        if let Some(threshold) = self.outlier_threshold {
            info!("║ Outlier score threshold:  {:.4}", threshold);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Anomaly Score Distribution:                                  ║");
        let scored: u64 = self.score_buckets.iter().sum();
        for (i, &count) in self.score_buckets.iter().enumerate() {
            let pct = if scored > 0 {
                (count as f64 / scored as f64) * 100.0
            } else {
                0.0
            };
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar(pct)
            );
        }
        if let Some(histogram) = &self.suspicious_amounts {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Suspicious Amounts:                                          ║");
            let width = histogram.bin_width();
            for (i, &count) in histogram.counts.iter().enumerate() {
                let lo = histogram.min + width * i as f64;
                let pct = (count as f64 / self.suspicious.max(1) as f64) * 100.0;
                info!(
                    "║   {:>10.2}-{:<10.2}: {:>5} {}",
                    lo,
                    lo + width,
                    count,
                    bar(pct)
                );
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        for (stage, elapsed) in timings.iter() {
            info!("║ {:<20} {:>10} μs", stage.as_str(), elapsed.as_micros());
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

fn bar(pct: f64) -> String {
    "█".repeat(((pct / 2.0) as usize).min(20))
}
