//! # Record Store
//!
//! The storage seam. Implementations must enforce `id` uniqueness themselves:
//! [`RecordStore::insert`] reports an existing id as [`StoreError::Duplicate`]
//! atomically, never through a separate existence check.

use std::future::Future;
use std::time::Duration;

use super::error::StoreError;
use super::model::Record;
use super::query::ListQuery;

/// Result of a filtered, sorted, paginated scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    pub items: Vec<Record>,
    /// Matches for the filter, ignoring paging.
    pub total: u64,
}

pub trait RecordStore: Send + Sync + 'static {
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Inserts a new record and returns the stored row.
    fn insert(&self, record: &Record) -> impl Future<Output = Result<Record, StoreError>> + Send;

    /// Replaces every editable field of `record.id`. `None` when no row matched.
    fn update(
        &self,
        record: &Record,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Removes the row and returns it. `None` when no row matched.
    fn delete(&self, id: &str) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Rows matching `query.search_term`, ordered by the sort column then `id`,
    /// limited to the requested page, plus the total match count.
    fn scan(&self, query: &ListQuery) -> impl Future<Output = Result<ScanPage, StoreError>> + Send;
}

/// Bounds a store call by `limit`, reporting overruns as [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
