//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage/database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Not found error.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint collision.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Registration code already consumed or expired.
    #[error("expired or already used: {0}")]
    ExpiredOrUsed(String),
}

impl From<Error> for omega_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(s) => omega_core::Error::NotFound(s),
            Error::Duplicate(s) => omega_core::Error::DuplicateKey(s),
            Error::ExpiredOrUsed(s) => omega_core::Error::ExpiredOrUsed(s),
            Error::Serialization(s) => omega_core::Error::InvalidInput(s),
            Error::Io(e) => omega_core::Error::Transient(e.to_string()),
            Error::Storage(s) => omega_core::Error::Transient(s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(format!("redb error: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("redb table error: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("redb database error: {}", e))
    }
}
