use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::model::Record;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// A tag was read by a scanner. Not a mutation.
    Scanned,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Scanned => "scanned",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a change event: the full record, or only its id after deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangePayload {
    Record(Record),
    Tombstone { id: String },
}

impl ChangePayload {
    pub fn id(&self) -> &str {
        match self {
            ChangePayload::Record(record) => &record.id,
            ChangePayload::Tombstone { id } => id,
        }
    }
}

/// # Change Event
///
/// One notification, serialised identically on every live transport:
/// `{"event": "...", "data": {...}, "timestamp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event: ChangeKind,
    pub data: ChangePayload,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn created(record: Record) -> Self {
        Self::now(ChangeKind::Created, ChangePayload::Record(record))
    }

    pub fn updated(record: Record) -> Self {
        Self::now(ChangeKind::Updated, ChangePayload::Record(record))
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        Self::now(ChangeKind::Deleted, ChangePayload::Tombstone { id: id.into() })
    }

    pub fn scanned(record: Record) -> Self {
        Self::now(ChangeKind::Scanned, ChangePayload::Record(record))
    }

    fn now(event: ChangeKind, data: ChangePayload) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
