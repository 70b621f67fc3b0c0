//! Error taxonomy shared across the platform.

use thiserror::Error;

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Platform error types.
///
/// `NotFound`, `InvalidInput`, `DuplicateKey`, and `ExpiredOrUsed` are
/// returned to the immediate caller and never retried. `Unauthorized` at
/// the ingestion boundary is logged and dropped; elsewhere it surfaces to
/// the caller. `Transient` covers timeouts and transport faults.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown type, instance, or registration record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad type id or malformed payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unique-constraint collision.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Failed access check or failed telemetry authentication.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Registration code already consumed or past its expiry.
    #[error("registration code expired or already used: {0}")]
    ExpiredOrUsed(String),

    /// Registry/record mismatch (e.g. a record referencing a type that
    /// no longer exists).
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Recoverable fault: timeouts, transport or storage errors.
    #[error("transient error: {0}")]
    Transient(String),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed JSON: {}", e))
    }
}
