//! Error types for the WorkLogix server.
//!
//! This module defines the top-level error used by the HTTP layer and the
//! timer service, providing type-safe error handling with meaningful error
//! messages and a stable mapping to HTTP status codes.
//!
//! # Error Kinds
//!
//! - **NotFound** - no TimeLog or Task exists for the given key
//! - **InvalidState** - the operation is not valid for the current timer status
//! - **Unauthorized** - missing or invalid credentials
//! - **TransientIo** - a collaborator (task service, storage) failed transiently
//! - **Validation** - malformed request data
//! - **Internal** - unexpected failures
//!
//! Domain modules have their own error enums ([`TimerError`], [`TaskError`])
//! which convert into [`ServerError`] with `?`.
//!
//! # Example
//!
//! ```rust
//! use worklogix_server::error::ServerError;
//!
//! let err = ServerError::validation("userId cannot be empty");
//! assert!(err.is_client_error());
//! assert_eq!(err.code(), "invalid_request");
//! ```

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::tasks::TaskError;
use crate::timer::TimerError;
use crate::types::TimerStatus;

/// Top-level error type for the WorkLogix server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during server initialization.
    Config(ConfigError),

    /// The requested timer log or task does not exist.
    NotFound(String),

    /// The operation is not valid for the timer's current status.
    InvalidState {
        /// Operation that was attempted (`start`, `pause`, ...).
        operation: &'static str,
        /// Status the timer was in when the operation was rejected.
        status: TimerStatus,
    },

    /// Authentication or authorization failure.
    Unauthorized(String),

    /// A collaborator failed in a way that may succeed on retry.
    TransientIo(String),

    /// Request validation failure.
    Validation(String),

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::InvalidState { operation, status } => {
                write!(f, "cannot {operation} a timer that is {status}")
            }
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::TransientIo(msg) => write!(f, "temporarily unavailable: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<TimerError> for ServerError {
    fn from(err: TimerError) -> Self {
        match err {
            TimerError::NotFound(key) => Self::NotFound(format!("timer {key}")),
            TimerError::InvalidState {
                operation, status, ..
            } => Self::InvalidState { operation, status },
            TimerError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<TaskError> for ServerError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(task_id) => Self::NotFound(format!("task {task_id}")),
            // The service rejected this server's credentials, not the caller's.
            TaskError::Unauthorized => Self::Internal("task service rejected credentials".into()),
            TaskError::AlreadyExists(task_id) => {
                Self::Validation(format!("task {task_id} already exists"))
            }
            TaskError::Unsupported(operation) => {
                Self::Validation(format!("task {operation} is not supported by the task service"))
            }
            other if other.is_transient() => Self::TransientIo(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ServerError {
    /// Creates a new not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a new unauthorized error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use worklogix_server::error::ServerError;
    ///
    /// let err = ServerError::unauthorized("invalid token");
    /// assert!(matches!(err, ServerError::Unauthorized(_)));
    /// ```
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new transient I/O error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InvalidState { .. }
                | Self::Unauthorized(_)
                | Self::Validation(_)
        )
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState { .. } => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::Unauthorized(_) => "unauthorized",
            Self::Validation(_) => "invalid_request",
            Self::TransientIo(_) => "transient_io",
            Self::Config(_) | Self::Internal(_) => "internal_error",
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        // Internal details stay in the logs.
        let message = match &self {
            Self::Config(_) | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse::new(message).with_code(self.code())),
        )
            .into_response()
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
