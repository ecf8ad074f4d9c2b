//! Batch orchestration: source, features, rules and model, combiner, sinks

use crate::combiner::SuspicionCombiner;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage, StageFailure};
use crate::feature_extractor::{DerivedBatch, FeatureExtractor};
use crate::metrics::{BatchSummary, StageTimings};
use crate::models::detector::{OutlierColumn, OutlierDetector};
use crate::rules::{RuleColumns, RuleEngine};
use crate::sink::Sink;
use crate::source::TransactionSource;
use crate::types::labeled::LabeledBatch;
use crate::types::transaction::Transaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Result of a run whose labels were computed.
///
/// Sink failures do not invalidate `batch`; they are listed here instead.
#[derive(Debug)]
pub struct PipelineRun {
    pub batch: LabeledBatch,
    pub sink_failures: Vec<PipelineError>,
    pub timings: StageTimings,
}

impl PipelineRun {
    /// All sinks reported success
    pub fn is_persisted(&self) -> bool {
        self.sink_failures.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_batch(&self.batch)
    }
}

/// Labels a batch of transactions as suspicious or normal
pub struct FlaggingPipeline {
    extractor: FeatureExtractor,
    rules: RuleEngine,
    detector: OutlierDetector,
    combiner: SuspicionCombiner,
}

impl FlaggingPipeline {
    /// Build the stages from configuration, rejecting invalid options
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            extractor: FeatureExtractor::new(config.on_malformed),
            rules: RuleEngine::new(config.micro_threshold, config.large_quantile),
            detector: OutlierDetector::new(config),
            combiner: SuspicionCombiner::new(),
        })
    }

    /// Compute labels for an in-memory batch
    pub async fn label(&self, transactions: Vec<Transaction>) -> Result<LabeledBatch, StageFailure> {
        let mut timings = StageTimings::new();
        self.label_timed(transactions, &mut timings).await
    }

    async fn label_timed(
        &self,
        transactions: Vec<Transaction>,
        timings: &mut StageTimings,
    ) -> Result<LabeledBatch, StageFailure> {
        let started = Instant::now();
        let derived = self
            .extractor
            .derive(transactions)
            .map_err(|e| StageFailure::new(Stage::FeatureDerivation, e))?;
        timings.record(Stage::FeatureDerivation, started.elapsed());

        let (derived, rules, outliers) = self.score(derived, timings).await?;

        let started = Instant::now();
        let large_threshold = rules.large_threshold;
        let outlier_threshold = outliers.threshold;
        let model_fitted = outliers.fitted;
        let records = self
            .combiner
            .combine(derived.records, &rules, &outliers)
            .map_err(|e| StageFailure::new(Stage::Combiner, e))?;
        timings.record(Stage::Combiner, started.elapsed());

        let batch = LabeledBatch {
            records,
            large_threshold,
            outlier_threshold,
            model_fitted,
            rejected: derived.rejected,
        };

        info!(
            records = batch.len(),
            suspicious = batch.suspicious_count(),
            rejected = batch.rejected.len(),
            "Batch labeled"
        );

        Ok(batch)
    }

    /// Run the rule engine and anomaly model as two blocking tasks and join them
    async fn score(
        &self,
        derived: DerivedBatch,
        timings: &mut StageTimings,
    ) -> Result<(DerivedBatch, RuleColumns, OutlierColumn), StageFailure> {
        let points = self.extractor.feature_matrix(&derived);
        let derived = Arc::new(derived);

        let rules = self.rules.clone();
        let rule_input = Arc::clone(&derived);
        let rule_task = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let columns = rules.evaluate(&rule_input);
            (columns, started.elapsed())
        });

        let detector = self.detector.clone();
        let model_task = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let column = detector.detect(&points);
            (column, started.elapsed())
        });

        let (rule_out, model_out) = futures::future::join(rule_task, model_task).await;

        let (rules, rule_elapsed): (RuleColumns, Duration) = rule_out.map_err(|e| {
            StageFailure::new(Stage::RuleEngine, PipelineError::Task(e.to_string()))
        })?;
        timings.record(Stage::RuleEngine, rule_elapsed);

        let (outliers, model_elapsed) = model_out.map_err(|e| {
            StageFailure::new(Stage::AnomalyModel, PipelineError::Task(e.to_string()))
        })?;
        let outliers = outliers.map_err(|e| StageFailure::new(Stage::AnomalyModel, e))?;
        timings.record(Stage::AnomalyModel, model_elapsed);

        // Both tasks have finished, so this is the only reference left
        let derived = Arc::try_unwrap(derived).unwrap_or_else(|shared| (*shared).clone());

        Ok((derived, rules, outliers))
    }

    /// Fetch, label and persist one batch.
    ///
    /// Stage failures abort the run. Sink failures are logged and returned in
    /// [`PipelineRun::sink_failures`] next to the complete labels.
    pub async fn run(
        &self,
        source: &mut dyn TransactionSource,
        sinks: &[&dyn Sink],
    ) -> Result<PipelineRun, StageFailure> {
        let mut timings = StageTimings::new();

        let started = Instant::now();
        let transactions = source
            .fetch()
            .await
            .map_err(|e| StageFailure::new(Stage::Source, e))?;
        timings.record(Stage::Source, started.elapsed());
        info!(source = source.name(), count = transactions.len(), "Batch fetched");

        let batch = self.label_timed(transactions, &mut timings).await?;

        let started = Instant::now();
        let mut sink_failures = Vec::new();
        for sink in sinks {
            if let Err(e) = sink.persist(&batch).await {
                error!(sink = sink.name(), error = %e, "Failed to persist batch");
                sink_failures.push(e);
            }
        }
        timings.record(Stage::Sink, started.elapsed());

        Ok(PipelineRun {
            batch,
            sink_failures,
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MalformedPolicy;
    use crate::error::Result;
    use crate::sink::CsvSink;
    use crate::source::{persist_batch, JsonFileSource, SyntheticSource};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn pipeline() -> FlaggingPipeline {
        FlaggingPipeline::new(&PipelineConfig::default()).unwrap()
    }

    fn synthetic(count: usize, seed: u64) -> Vec<Transaction> {
        SyntheticSource::new(count, seed)
            .with_base_time(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
            .generate()
    }

    /// Records what it was asked to persist
    #[derive(Default)]
    struct MemorySink {
        all: Mutex<usize>,
        suspicious: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Sink for MemorySink {
        async fn persist(&self, batch: &LabeledBatch) -> Result<()> {
            *self.all.lock().unwrap() = batch.len();
            *self.suspicious.lock().unwrap() =
                batch.suspicious().map(|r| r.id().to_string()).collect();
            Ok(())
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn persist(&self, _batch: &LabeledBatch) -> Result<()> {
            Err(PipelineError::sink("failing", "connection refused"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_label_is_union_of_signals() {
        let batch = pipeline().label(synthetic(200, 17)).await.unwrap();

        assert_eq!(batch.len(), 200);
        assert!(batch.model_fitted);
        for r in &batch.records {
            assert_eq!(r.is_suspicious, r.is_outlier || r.micro_flag || r.large_flag);
            assert_eq!(r.micro_flag, r.amount() < 1.0);
        }

        let outliers = batch.records.iter().filter(|r| r.is_outlier).count();
        assert!((5..=15).contains(&outliers), "flagged {} outliers", outliers);
    }

    #[tokio::test]
    async fn test_labels_are_deterministic() {
        let first = pipeline().label(synthetic(150, 2)).await.unwrap();
        let second = pipeline().label(synthetic(150, 2)).await.unwrap();

        assert_eq!(first.labels(), second.labels());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let batch = pipeline().label(Vec::new()).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.large_threshold, None);
        assert!(!batch.model_fitted);
    }

    #[tokio::test]
    async fn test_single_record_batch() {
        let tx = Transaction::new("only", "2024-06-01T12:00:00Z", 0.3);
        let batch = pipeline().label(vec![tx]).await.unwrap();

        let record = &batch.records[0];
        assert!(record.micro_flag);
        assert!(!record.large_flag);
        assert!(!record.is_outlier);
        assert!(record.is_suspicious);
    }

    #[tokio::test]
    async fn test_three_record_scenario() {
        let batch = vec![
            Transaction::new("a", "2024-06-01T12:00:00Z", 0.5),
            Transaction::new("b", "2024-06-01T12:00:05Z", 50.0),
            Transaction::new("c", "2024-06-01T12:00:10Z", 10000.0),
        ];
        let labeled = pipeline().label(batch).await.unwrap();

        let micro: Vec<bool> = labeled.records.iter().map(|r| r.micro_flag).collect();
        let large: Vec<bool> = labeled.records.iter().map(|r| r.large_flag).collect();
        assert_eq!(micro, vec![true, false, false]);
        assert_eq!(large, vec![false, false, true]);
        assert_eq!(labeled.labels(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_malformed_record_reports_stage() {
        let mut batch = synthetic(20, 4);
        batch[7].created_at = "31/02/2024".to_string();

        let failure = pipeline().label(batch).await.unwrap_err();

        assert_eq!(failure.stage, Stage::FeatureDerivation);
        assert!(matches!(
            failure.source,
            PipelineError::MalformedRecord { ref record_id, .. } if record_id == "tx_7"
        ));
    }

    #[tokio::test]
    async fn test_skip_policy_labels_remaining_records() {
        let config = PipelineConfig {
            on_malformed: MalformedPolicy::Skip,
            ..PipelineConfig::default()
        };
        let mut batch = synthetic(20, 4);
        batch[3].amount = -10.0;

        let labeled = FlaggingPipeline::new(&config)
            .unwrap()
            .label(batch)
            .await
            .unwrap();

        assert_eq!(labeled.len(), 19);
        assert_eq!(labeled.rejected.len(), 1);
        assert_eq!(labeled.rejected[0].record_id, "tx_3");
    }

    #[tokio::test]
    async fn test_strict_model_failure_reports_stage() {
        let config = PipelineConfig {
            strict_model: true,
            ..PipelineConfig::default()
        };
        let failure = FlaggingPipeline::new(&config)
            .unwrap()
            .label(synthetic(5, 1))
            .await
            .unwrap_err();

        assert_eq!(failure.stage, Stage::AnomalyModel);
        assert!(matches!(
            failure.source,
            PipelineError::InsufficientData { available: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            large_quantile: 0.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FlaggingPipeline::new(&config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_run_hands_both_tables_to_sinks() {
        let mut source = SyntheticSource::new(120, 9)
            .with_base_time(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let sink = MemorySink::default();

        let run = pipeline().run(&mut source, &[&sink]).await.unwrap();

        assert!(run.is_persisted());
        assert_eq!(*sink.all.lock().unwrap(), 120);
        let expected: Vec<String> = run.batch.suspicious().map(|r| r.id().to_string()).collect();
        assert_eq!(*sink.suspicious.lock().unwrap(), expected);
        assert!(run.timings.get(Stage::AnomalyModel).is_some());
        assert_eq!(run.summary().suspicious, expected.len());
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_labels() {
        let mut source = SyntheticSource::new(60, 3)
            .with_base_time(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let good = MemorySink::default();

        let run = pipeline()
            .run(&mut source, &[&FailingSink, &good])
            .await
            .unwrap();

        assert!(!run.is_persisted());
        assert_eq!(run.batch.len(), 60);
        assert_eq!(run.sink_failures.len(), 1);
        assert!(!run.sink_failures[0].is_fatal());
        assert_eq!(*good.all.lock().unwrap(), 60);
    }

    #[tokio::test]
    async fn test_rerun_on_persisted_batch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let batch_path = dir.path().join("batch.json");
        persist_batch(&batch_path, &synthetic(200, 21)).await.unwrap();
        let sink = CsvSink::new(dir.path(), "all.csv", "suspicious.csv");

        let first = pipeline()
            .run(&mut JsonFileSource::new(&batch_path), &[&sink])
            .await
            .unwrap();
        let first_csv = std::fs::read_to_string(sink.all_path()).unwrap();

        let second = pipeline()
            .run(&mut JsonFileSource::new(&batch_path), &[&sink])
            .await
            .unwrap();
        let second_csv = std::fs::read_to_string(sink.all_path()).unwrap();

        assert_eq!(first.batch.labels(), second.batch.labels());
        assert_eq!(first_csv, second_csv);
        assert_eq!(first_csv.lines().count(), 201);
    }
}
