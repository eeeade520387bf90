//! Store error types.

use thiserror::Error;

/// Errors from store operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A payload or column failed JSON (de)serialization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested row does not exist (or is not visible to the
    /// caller's owner scope).
    #[error("not found: {0}")]
    NotFound(String),

    /// A guarded status transition matched no row — the row moved first.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A multi-row invariant did not hold inside a transaction.
    #[error("conflict: {0}")]
    Conflict(String),
}
