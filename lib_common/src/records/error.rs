use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`RecordStore`](super::store::RecordStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The id is already taken (unique constraint).
    #[error("a record with id '{0}' already exists")]
    Duplicate(String),
    /// No connection to the storage backend could be obtained.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The backend rejected or failed the statement.
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage call exceeded {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the query engine, mutation pipeline and scanner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Malformed or missing fields, invalid paging parameters.
    #[error("{0}")]
    Validation(String),
    /// `sortBy` named a column outside the allow-list.
    #[error("invalid sortBy column '{0}'")]
    InvalidSortColumn(String),
    #[error("record '{0}' not found")]
    NotFound(String),
    /// Create with an id that already exists.
    #[error("a record with id '{0}' already exists")]
    Conflict(String),
    #[error(transparent)]
    Storage(StoreError),
}

impl RecordError {
    /// Stable, machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Validation(_) => "ValidationError",
            RecordError::InvalidSortColumn(_) => "InvalidSortColumn",
            RecordError::NotFound(_) => "NotFound",
            RecordError::Conflict(_) => "Conflict",
            RecordError::Storage(_) => "StorageUnavailable",
        }
    }
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => RecordError::Conflict(id),
            other => RecordError::Storage(other),
        }
    }
}
