//! Error types for the decision intelligence engine
//!
//! Errors are classified by recoverability:
//! - Retryable: recompute throttled inside the debounce window, busy database
//! - NonRetryable: missing case, malformed stored state, configuration errors

use thiserror::Error;

use crate::db::DbError;

/// Error types for intelligence computation and lifecycle operations
#[derive(Debug, Error)]
pub enum EngineError {
    // Retryable errors
    #[error("Recompute throttled for case {case_id}; retry in {retry_after_ms}ms")]
    Throttled { case_id: String, retry_after_ms: u64 },

    // Non-retryable errors
    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Case reader error: {0}")]
    Reader(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Throttled { .. })
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EngineError::Throttled { .. } => {
                "A recompute for this case just ran. Wait a moment and try again."
            }
            EngineError::CaseNotFound(_) => "Verify the case id; the case may have been deleted.",
            EngineError::Db(_) => "Check that the database file is accessible and not corrupted.",
            EngineError::Reader(_) => "Check the case artifact store for this case.",
            EngineError::Serialization(_) => {
                "A stored intelligence row could not be decoded. Recompute the case."
            }
            EngineError::Configuration(_) => {
                "Check your configuration in ~/.caseintel/config.json"
            }
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
