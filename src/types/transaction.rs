//! Raw transaction records as produced by a source

use serde::{Deserialize, Serialize};

/// A ledger transaction to be screened for suspicious activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier (ledger hash)
    #[serde(alias = "hash", alias = "transaction_id")]
    pub id: String,

    /// Time the transaction occurred, RFC 3339 or naive ISO-8601 (read as UTC)
    #[serde(alias = "timestamp")]
    pub created_at: String,

    /// Transferred amount, non-negative
    pub amount: f64,

    /// Sending account
    pub source_account: String,

    /// Receiving account
    pub destination_account: String,
}

impl Transaction {
    /// Create a transaction between two placeholder accounts
    pub fn new(id: impl Into<String>, created_at: impl Into<String>, amount: f64) -> Self {
        Self {
            id: id.into(),
            created_at: created_at.into(),
            amount,
            source_account: "GSOURCE".to_string(),
            destination_account: "GDESTINATION".to_string(),
        }
    }
}
