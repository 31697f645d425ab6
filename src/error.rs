//! Archive-specific error types.
//!
//! All archive operations return [`ArchiveError`] on failure, which can be
//! matched to determine the underlying cause (database, lifecycle, etc.).

use thiserror::Error;

/// Errors that can occur in the archive layer.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Operation invoked after `dispose()`.
    #[error("archive disposed")]
    Disposed,

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error on a value column.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record kind does not support the requested operation.
    ///
    /// Distinct from a data error: the archive is healthy, the operation
    /// simply has no meaning for this kind (e.g. a latest-state snapshot
    /// on raw transport frames).
    #[error("operation not supported by the {0} archive")]
    Unsupported(&'static str),

    /// Invalid data encountered while decoding a row (e.g. unknown enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g. I/O while creating the database directory).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    /// True when the error denotes a missing capability rather than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ArchiveError::Unsupported(_))
    }
}
