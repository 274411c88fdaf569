//! Error types for mate-agent

use thiserror::Error;

/// Result type alias using mate-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session, pipeline, and store operations
#[derive(Error, Debug)]
pub enum Error {
    /// A rule or profile failed validation; nothing was mutated
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The inference endpoint failed
    #[error(transparent)]
    Ai(#[from] mate_ai::Error),

    /// A turn is already in flight
    #[error("A response is already being generated")]
    Busy,

    /// Compression requested with no history
    #[error("No conversation to compress")]
    EmptyHistory,

    /// Settings or conversation storage could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error came from the inference transport
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Ai(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}
