//! # Animal Records
//!
//! Everything between the HTTP layer and the database for the animal registry:
//!
//! - **`model`**: the [`Record`] shape and write-body validation.
//! - **`query`**: the query engine (search, allow-listed sort, pagination).
//! - **`mutation`**: create/update/delete with per-id ordering and notification.
//! - **`notifier`** / **`events`**: the [`ChangeEvent`] fan-out to live observers.
//! - **`scan`**: RFID tag lookups that announce themselves to observers.
//! - **`store`**: the [`RecordStore`] trait, with memory and PostgreSQL backends.
//! - **`service`**: [`RecordService`], which wires the above to one store.

pub mod error;
pub mod events;
pub mod model;
pub mod mutation;
pub mod notifier;
pub mod query;
pub mod scan;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_postgres;

// --- Public API Re-exports ---
pub use error::{RecordError, StoreError};
pub use events::{ChangeEvent, ChangeKind, ChangePayload};
pub use model::{Record, RecordDraft};
pub use mutation::MutationPipeline;
pub use notifier::{ChangeNotifier, ChangeSubscription};
pub use query::{ListPage, ListParams, ListQuery, PageLimits, QueryEngine, SortColumn, SortDirection};
pub use scan::TagScanner;
pub use service::{RecordService, ServiceSettings};
pub use store::{RecordStore, ScanPage};
pub use store_memory::MemoryRecordStore;
pub use store_postgres::PgRecordStore;
