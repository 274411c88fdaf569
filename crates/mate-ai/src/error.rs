//! Error types for mate-ai

use thiserror::Error;

/// Result type alias using mate-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the inference server
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connection refused, reset, body read error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    /// A one-shot request exceeded its deadline
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Stream was aborted by the caller
    #[error("Request aborted")]
    Aborted,

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Model not found on the server
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Map a reqwest error, folding client-side deadlines into [`Error::Timeout`].
    pub fn from_request(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Error::Timeout(timeout_secs)
        } else {
            Error::Http(err)
        }
    }

    /// Whether the server could not be reached at all
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect(),
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if this error indicates the model's context window overflowed
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Error::Api { message, .. } => {
                let msg = message.to_lowercase();
                msg.contains("context length")
                    || msg.contains("context window")
                    || msg.contains("too many tokens")
                    || msg.contains("n_ctx")
                    || msg.contains("input too long")
            }
            _ => false,
        }
    }
}
