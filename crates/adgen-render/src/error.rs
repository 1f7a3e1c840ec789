//! Render client error types.

use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors returned by the render service or while talking to it.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Render service error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Placeholder render failed: {0}")]
    Placeholder(#[from] adgen_media::MediaError),
}

impl RenderError {
    /// Classify a non-success HTTP status.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: body.into(),
        }
    }

    /// Classify an error `code` carried in a response body.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transient failures are worth another attempt; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::Http { status, .. } => is_transient_status(*status),
            RenderError::Api { code, .. } => is_transient_code(code),
            RenderError::Network(e) => !e.is_builder() && !e.is_decode(),
            RenderError::Timeout | RenderError::Io(_) => true,
            RenderError::InvalidResponse(_)
            | RenderError::Config(_)
            | RenderError::Placeholder(_) => false,
        }
    }
}

/// 408, 429 and 5xx are transient.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Provider codes for throttling and internal errors are transient.
pub fn is_transient_code(code: &str) -> bool {
    code.starts_with("Throttling")
        || code.starts_with("InternalError")
        || code == "ServiceUnavailable"
        || code == "RequestTimeOut"
}
