//! Type definitions for the flagging pipeline

pub mod alert;
pub mod labeled;
pub mod transaction;

pub use alert::{RiskLevel, SuspicionReason, SuspicionReport};
pub use labeled::{
    DerivedTransaction, LabeledBatch, LabeledTransaction, OutlierVerdict, RejectedRecord,
    RuleFlags,
};
pub use transaction::Transaction;
