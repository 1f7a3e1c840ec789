//! Engine error types.

use thiserror::Error;

use adgen_models::SequenceError;
use adgen_render::RenderError;
use adgen_store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeout or 5xx-equivalent from an external collaborator; retried per policy.
    #[error("Transient external error: {0}")]
    TransientExternal(String),

    /// Rejected prompt or image, malformed job; terminal immediately.
    #[error("Permanent external error: {0}")]
    PermanentExternal(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Sequence integrity violation: {0}")]
    SequenceIntegrity(#[from] SequenceError),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientExternal(_) | EngineError::Io(_))
    }

    /// Errors caused by the caller's input rather than the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::SequenceIntegrity(_) | EngineError::PermanentExternal(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::InvalidTransition(msg) => EngineError::InvalidTransition(msg),
            StoreError::SequenceIntegrity(seq) => EngineError::SequenceIntegrity(seq),
            other => EngineError::Store(other),
        }
    }
}

impl From<RenderError> for EngineError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Timeout => EngineError::TransientExternal("render call timed out".into()),
            RenderError::Config(msg) => EngineError::Config(msg),
            e if e.is_retryable() => EngineError::TransientExternal(e.to_string()),
            e => EngineError::PermanentExternal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_errors_map_onto_taxonomy() {
        let transient: EngineError = RenderError::from_http_status(502, "bad gateway").into();
        assert!(transient.is_retryable());

        let permanent: EngineError = RenderError::from_http_status(400, "bad image").into();
        assert!(matches!(permanent, EngineError::PermanentExternal(_)));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_store_errors_keep_their_kind() {
        let e: EngineError = StoreError::not_found("g1").into();
        assert!(matches!(e, EngineError::NotFound(_)));
        let e: EngineError = StoreError::invalid_transition("terminal").into();
        assert!(matches!(e, EngineError::InvalidTransition(_)));
        let e: EngineError = StoreError::SequenceIntegrity(SequenceError::Empty).into();
        assert!(e.is_client_error());
    }
}
