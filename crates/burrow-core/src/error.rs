use thiserror::Error;

use crate::link::LinkId;

/// Errors raised while validating core domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid link id: {0}")]
    InvalidLinkId(String),
    #[error("invalid owner: {0}")]
    InvalidOwner(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors returned by every [`Storage`](crate::Storage) backend.
///
/// Ownership mismatches are not represented here: a delete issued by a
/// non-owner is skipped silently so that callers cannot probe for the
/// existence of other users' links.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("link not found: {0}")]
    NotFound(LinkId),
    #[error("link id generation failed: {0}")]
    Generation(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Whether the error is worth retrying under the caller's own policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<CoreError> for StorageError {
    fn from(value: CoreError) -> Self {
        Self::InvalidData(value.to_string())
    }
}
