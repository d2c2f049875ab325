//! In-process record store.
//!
//! Every operation runs inside one critical section, so duplicate detection on
//! insert is atomic and a scan's count and page always come from the same
//! snapshot. Text columns sort case-insensitively, as the Postgres store
//! orders them by `LOWER(column)`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::error::StoreError;
use super::model::Record;
use super::query::{ListQuery, SortColumn, SortDirection};
use super::store::{RecordStore, ScanPage};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<String, Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `records`. Later duplicates overwrite earlier ones.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let rows = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches(record: &Record, needle: &str) -> bool {
    needle.is_empty()
        || record.name.to_lowercase().contains(needle)
        || record.species.to_lowercase().contains(needle)
}

fn caseless(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare(a: &Record, b: &Record, column: SortColumn) -> Ordering {
    match column {
        SortColumn::Id => a.id.cmp(&b.id),
        SortColumn::Name => caseless(&a.name, &b.name),
        SortColumn::Species => caseless(&a.species, &b.species),
        SortColumn::Age => a.age.cmp(&b.age),
        SortColumn::HealthStatus => caseless(&a.health_status, &b.health_status),
    }
}

impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(id).cloned())
    }

    async fn insert(&self, record: &Record) -> Result<Record, StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        if rows.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        rows.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn update(&self, record: &Record) -> Result<Option<Record>, StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get_mut(&record.id).map(|row| {
            *row = record.clone();
            row.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.remove(id))
    }

    async fn scan(&self, query: &ListQuery) -> Result<ScanPage, StoreError> {
        let needle = query.search_term.to_lowercase();
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<&Record> = rows.values().filter(|r| matches(r, &needle)).collect();
        hits.sort_by(|a, b| {
            let primary = match query.sort_direction {
                SortDirection::Ascending => compare(a, b, query.sort_column),
                SortDirection::Descending => compare(b, a, query.sort_column),
            };
            primary.then_with(|| a.id.cmp(&b.id))
        });

        let total = hits.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = hits
            .into_iter()
            .skip(offset)
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(ScanPage { items, total })
    }
}
