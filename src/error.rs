//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

/// Main error type for search, indexing and generation.
#[derive(Error, Debug)]
pub enum Error {
    /// A required credential or identifier is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rate limit, timeout or network blip; safe to retry.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The remote service rejected the request outright.
    #[error("remote service returned {status}: {body}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response body (or a placeholder when unavailable).
        body: String,
    },

    /// A remote call failed on its final permitted attempt.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RemoteCall {
        /// Human-readable operation label.
        operation: String,
        /// Attempts made before giving up.
        attempts: usize,
        /// Error from the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// A record is malformed or missing expected fields.
    #[error("malformed record: {0}")]
    PartialData(String),

    /// A collection rebuild stopped part way through.
    #[error("index rebuild incomplete: {0}")]
    IndexState(String),

    /// A remote response could not be interpreted.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies a transport-level failure.
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        // builder and redirect errors will not heal on retry either
        if err.is_decode() || err.is_builder() || err.is_redirect() {
            Self::Decode(format!("{context}: {err}"))
        } else {
            Self::Transient(format!("{context}: {err}"))
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient(format!("{status}: {body}"))
        } else {
            Self::Remote {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
