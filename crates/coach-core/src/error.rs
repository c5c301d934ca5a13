//! Unified error handling for coach-core

use thiserror::Error;

/// Core error type for coach-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The user has no remaining balance for the requested feature
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A request with the same idempotency key (or the same session) is still running
    #[error("Already in progress: {0}")]
    AlreadyInProgress(String),

    /// A SUCCESS record points at an artifact that does not exist
    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),

    /// The AI returned malformed or insufficient output, or timed out
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Resume document download or parsing failed
    #[error("External fetch failed: {0}")]
    ExternalFetchFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Quota could not be given back after a billed failure
    #[error("Refund failed: {0}")]
    RefundFailed(String),

    /// Unique constraint violated on insert
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for coach-core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a generation failure
    pub fn generation(msg: impl Into<String>) -> Self {
        Error::GenerationFailed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether the error is caused by the caller's request rather than a fault in the system.
    ///
    /// User-facing errors map to 4xx-style responses; everything else is logged as a failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::QuotaExceeded(_)
                | Error::AlreadyInProgress(_)
                | Error::SessionNotFound(_)
                | Error::SessionExpired(_)
                | Error::Unauthorized(_)
                | Error::ExternalFetchFailed(_)
        )
    }

    /// Whether this is a unique-constraint violation reported by SQLite
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

// Convert to String for display at the CLI boundary
impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
