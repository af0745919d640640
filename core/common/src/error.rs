//! Common error types for Coffer.

use thiserror::Error;

/// Top-level error type for Coffer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Item, parent, or dependent resource does not exist (or was already purged).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Sibling name collision or concurrent structural mutation detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Owner storage quota would be exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Dependent-store cleanup failed. Non-fatal for the primary deletion;
    /// callers aggregate these into a partial-success report.
    #[error("Dependency cleanup failed: {0}")]
    DependencyCleanup(String),

    /// Blob store or item index backend failed.
    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
