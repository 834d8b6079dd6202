//! Error types for qrtag-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using qrtag-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in qrtag-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence could not be opened (quota, permissions, corrupt file)
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A write would leave a code pointing at a missing or deleted event
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote API error
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Whether the remote authority rejected the session.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Unauthorized))
    }
}
