//! Store error types.

use thiserror::Error;

use adgen_models::{SequenceError, TransitionError};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Generation not found: {0}")]
    NotFound(String),

    #[error("Generation already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Sequence integrity violation: {0}")]
    SequenceIntegrity(#[from] SequenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, StoreError::InvalidTransition(_))
    }
}

impl From<TransitionError> for StoreError {
    fn from(e: TransitionError) -> Self {
        Self::InvalidTransition(e.to_string())
    }
}
