//! # Shared Test Fixtures
//!
//! Record builders and instrumented [`RecordStore`] wrappers used by the
//! integration test targets in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lib_common::records::{
    ListQuery, MemoryRecordStore, Record, RecordDraft, RecordStore, ScanPage, StoreError,
};

pub fn animal(id: &str, name: &str, species: &str, age: i32, health_status: &str) -> Record {
    Record {
        id: id.to_string(),
        name: name.to_string(),
        species: species.to_string(),
        age,
        health_status: health_status.to_string(),
    }
}

pub fn draft(id: &str, name: &str, species: &str, age: i32, health_status: &str) -> RecordDraft {
    RecordDraft::from(animal(id, name, species, age, health_status))
}

/// Memory store that counts every call reaching it.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryRecordStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordStore for CountingStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        self.hit();
        self.inner.get(id).await
    }

    async fn insert(&self, record: &Record) -> Result<Record, StoreError> {
        self.hit();
        self.inner.insert(record).await
    }

    async fn update(&self, record: &Record) -> Result<Option<Record>, StoreError> {
        self.hit();
        self.inner.update(record).await
    }

    async fn delete(&self, id: &str) -> Result<Option<Record>, StoreError> {
        self.hit();
        self.inner.delete(id).await
    }

    async fn scan(&self, query: &ListQuery) -> Result<ScanPage, StoreError> {
        self.hit();
        self.inner.scan(query).await
    }
}

/// Memory store that sleeps before every write, to exercise store timeouts
/// and to widen race windows between concurrent writers.
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryRecordStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            delay,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl RecordStore for SlowStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, record: &Record) -> Result<Record, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert(record).await
    }

    async fn update(&self, record: &Record) -> Result<Option<Record>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(record).await
    }

    async fn delete(&self, id: &str) -> Result<Option<Record>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(id).await
    }

    async fn scan(&self, query: &ListQuery) -> Result<ScanPage, StoreError> {
        self.inner.scan(query).await
    }
}
