//! Unsupervised anomaly model

pub mod detector;
pub mod isolation_forest;

pub use detector::{OutlierColumn, OutlierDetector};
pub use isolation_forest::{IsolationForest, IsolationTree};
