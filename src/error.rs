//! Error taxonomy for the flagging pipeline

use std::fmt;
use thiserror::Error;

/// Pipeline stage, used to report where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Source,
    FeatureDerivation,
    RuleEngine,
    AnomalyModel,
    Combiner,
    Sink,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::FeatureDerivation => "feature_derivation",
            Stage::RuleEngine => "rule_engine",
            Stage::AnomalyModel => "anomaly_model",
            Stage::Combiner => "combiner",
            Stage::Sink => "sink",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by pipeline components
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An input field could not be interpreted
    #[error("malformed record {record_id}: {reason}")]
    MalformedRecord { record_id: String, reason: String },

    /// Batch too small for a fit the caller explicitly required
    #[error("insufficient data: {available} usable records, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    /// A record reached the combiner without every signal computed
    #[error("incomplete features for record {record_id}: missing {missing}")]
    IncompleteFeatures {
        record_id: String,
        missing: &'static str,
    },

    /// Persistence collaborator reported a failure
    #[error("sink {sink} failed: {reason}")]
    SinkFailure { sink: String, reason: String },

    /// Source collaborator could not produce a batch
    #[error("source {source_name} failed: {reason}")]
    Source { source_name: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A scoring task panicked or was cancelled before joining
    #[error("task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn malformed(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedRecord {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    pub fn sink(sink: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::SinkFailure {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error invalidates the computed labels
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::SinkFailure { .. })
    }
}

/// A failed run: which stage failed and why
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl StageFailure {
    pub fn new(stage: Stage, source: PipelineError) -> Self {
        Self { stage, source }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
