//! Persistence collaborators for labeled batches
//!
//! A sink receives the full labeled batch and persists both the full table
//! and the suspicious subset. Failures are reported back as
//! [`PipelineError::SinkFailure`](crate::error::PipelineError::SinkFailure)
//! and never invalidate the labels.

pub mod csv;
pub mod nats;

use crate::error::Result;
use crate::types::labeled::LabeledBatch;
use async_trait::async_trait;

pub use self::csv::CsvSink;
pub use self::nats::ReportProducer;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Persist the full table and the suspicious subset
    async fn persist(&self, batch: &LabeledBatch) -> Result<()>;

    /// Name used in logs and errors
    fn name(&self) -> &str;
}
