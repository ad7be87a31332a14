//! Error types for newsletter-scheduler
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Config, Database, Delivery, etc.)
//! - The [`StepError`] signal returned by pipeline step bodies
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for newsletter-scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for newsletter-scheduler
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "delivery.service_id")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An upstream HTTP service answered with a non-success status
    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        /// Which collaborator answered (e.g., "summarizer")
        service: String,
        /// HTTP status code returned by the service
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The summarizer produced no usable newsletter content
    #[error("summarizer returned empty content")]
    EmptySummary,

    /// Email delivery failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// A schedule event failed validation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Run, user or other record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The run exists but its trigger time has not arrived
    #[error("run {run_id} is not due until {trigger_at}")]
    RunNotDue {
        /// The run that was asked to execute early
        run_id: i64,
        /// Unix timestamp before which the run must not execute
        trigger_at: i64,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new runs
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

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

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Email delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A credential or identifier required to send email is not configured
    #[error("missing delivery configuration: {field}")]
    MissingConfiguration {
        /// Name of the missing setting (e.g., "service_id")
        field: String,
    },

    /// The email transport rejected the request
    #[error("email transport rejected the request with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the transport
        status: u16,
        /// Response body returned by the transport
        body: String,
    },
}

/// Outcome signalled by a pipeline step body other than success
///
/// A step body returns `Err(StepError::Skip { .. })` to end the run early without
/// failing it. Any other variant fails the step; only [`StepError::Failed`] wrapping
/// a retryable [`Error`] is retried.
#[derive(Debug, Error)]
pub enum StepError {
    /// End the run as `skipped`; the remaining steps do not execute
    #[error("skipped: {reason}")]
    Skip {
        /// Why the run stopped (e.g., "paused")
        reason: String,
    },

    /// The step body failed
    #[error(transparent)]
    Failed(#[from] Error),

    /// A step name was used twice within one run
    #[error("step '{0}' declared more than once in this run")]
    DuplicateStep(String),

    /// Unrecoverable failure raised directly by a step body
    #[error("{0}")]
    Fatal(String),
}

impl StepError {
    /// Create a skip signal with the given reason
    pub fn skip(reason: impl Into<String>) -> Self {
        StepError::Skip {
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StepError {
    fn from(e: sqlx::Error) -> Self {
        StepError::Failed(Error::Sqlx(e))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Failed(Error::Serialization(e))
    }
}

impl From<DeliveryError> for StepError {
    fn from(e: DeliveryError) -> Self {
        StepError::Failed(Error::Delivery(e))
    }
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
///     "code": "not_found",
///     "message": "not found: run 123",
///     "details": {
///       "run_id": 123
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
    /// Machine-readable error code (e.g., "not_found", "invalid_event")
    ///
    /// Clients can use this for programmatic error handling.
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

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidEvent(_) => 422,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            // 409 Conflict - run exists but may not start yet
            Error::RunNotDue { .. } => 409,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Network(_) => 502,
            Error::Upstream { .. } => 502,
            Error::EmptySummary => 502,
            Error::Delivery(DeliveryError::Rejected { .. }) => 502,

            // 503 Service Unavailable
            Error::Delivery(DeliveryError::MissingConfiguration { .. }) => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Network(_) => "network_error",
            Error::Upstream { .. } => "upstream_error",
            Error::EmptySummary => "empty_summary",
            Error::Delivery(e) => match e {
                DeliveryError::MissingConfiguration { .. } => "delivery_not_configured",
                DeliveryError::Rejected { .. } => "delivery_rejected",
            },
            Error::InvalidEvent(_) => "invalid_event",
            Error::NotFound(_) => "not_found",
            Error::RunNotDue { .. } => "run_not_due",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::RunNotDue { run_id, trigger_at } => Some(serde_json::json!({
                "run_id": run_id,
                "trigger_at": trigger_at,
            })),
            Error::Upstream {
                service, status, ..
            } => Some(serde_json::json!({
                "service": service,
                "status": status,
            })),
            Error::Delivery(DeliveryError::MissingConfiguration { field }) => {
                Some(serde_json::json!({
                    "field": field,
                }))
            }
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
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
