//! Error types for the WorkLogix timer client.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while talking to the WorkLogix server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The timer or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transition is not allowed from the current timer state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The server rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server rejected the request as malformed.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// A transient failure; retrying later may succeed.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// Any other non-success response.
    #[error("server error {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    /// All retry attempts were exhausted.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server URL cannot be turned into a request or push URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Returns `true` if the failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::MaxRetriesExceeded { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
