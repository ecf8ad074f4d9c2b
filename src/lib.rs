//! Transaction Flagging Pipeline Library
//!
//! Batch fraud screening for ledger transactions: threshold rules and an
//! isolation forest score the same batch, and their union labels each
//! transaction suspicious or normal.

pub mod combiner;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod rules;
pub mod sink;
pub mod source;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, Stage, StageFailure};
pub use feature_extractor::FeatureExtractor;
pub use models::detector::OutlierDetector;
pub use pipeline::{FlaggingPipeline, PipelineRun};
pub use rules::RuleEngine;
pub use sink::{CsvSink, ReportProducer, Sink};
pub use source::{JsonFileSource, SyntheticSource, TransactionSource};
pub use types::{labeled::LabeledBatch, transaction::Transaction};
