//! Error types for convertd
//!
//! This module provides error handling for the library, including:
//! - The submission-time validation taxonomy (missing input, unsupported format, size limit)
//! - Lookup errors shared by the status and artifact endpoints (not found, not ready)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//!
//! Processing-time failures are never returned from these APIs. They are recorded on
//! the task as a [`TaskFailure`](crate::types::TaskFailure) and surfaced through the
//! status endpoint.

use crate::types::TaskState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for convertd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for convertd
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "server.api.public_base_url")
        key: Option<String>,
    },

    /// The request did not carry a usable input file
    #[error("missing input: {0}")]
    MissingInput(String),

    /// The requested target format is missing or not in the supported set
    #[error("unsupported format: {reason}")]
    UnsupportedFormat {
        /// The format that was requested, if any
        format: Option<String>,
        /// Why the format was rejected
        reason: String,
    },

    /// The uploaded file exceeds the configured size limit
    #[error("payload too large: uploads are limited to {limit} bytes")]
    PayloadTooLarge {
        /// Configured upload limit in bytes
        limit: u64,
    },

    /// Unknown task identifier or artifact reference
    #[error("not found: {0}")]
    NotFound(String),

    /// The task exists but has not produced an artifact yet
    #[error("task {id} is not ready (current state: {state})")]
    NotReady {
        /// Task identifier
        id: String,
        /// Current task state
        state: TaskState,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new conversions
    #[error("shutdown in progress: not accepting new conversions")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be mapped back to a task
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Constraint violation (e.g., duplicate task id)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "unsupported_format",
///     "message": "unsupported format: 'qqq' is not a supported target format",
///     "details": {
///       "format": "qqq"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "payload_too_large")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - submission validation
            Error::Config { .. } => 400,
            Error::MissingInput(_) => 400,
            Error::UnsupportedFormat { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - artifact requested before completion
            Error::NotReady { .. } => 409,

            // 413 Payload Too Large
            Error::PayloadTooLarge { .. } => 413,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::MissingInput(_) => "missing_input",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::NotFound(_) => "not_found",
            Error::NotReady { .. } => "not_ready",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::UnsupportedFormat {
                format: Some(format),
                ..
            } => Some(serde_json::json!({
                "format": format,
            })),
            Error::PayloadTooLarge { limit } => Some(serde_json::json!({
                "limit_bytes": limit,
            })),
            Error::NotReady { id, state } => Some(serde_json::json!({
                "task_id": id,
                "state": state,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
