//! # Mutation Pipeline
//!
//! Each request walks `Received → Validated → Applied → Notified`. Validation
//! failures, not-found and conflicts stop before `Applied` and are never
//! notified. Once the store acknowledges the write, the event is built from the
//! row the store returned, not from the request, and handed to the notifier.
//!
//! Work on a single id holds that id's stripe of [`KeyLocks`] from the write
//! until the event is queued. Two writes to the same row therefore notify in
//! commit order; writes to different rows do not wait on each other (unless
//! they share a stripe).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::key_locks::KeyLocks;

use super::error::{RecordError, StoreError};
use super::events::ChangeEvent;
use super::model::{validate_id, Record, RecordDraft};
use super::notifier::ChangeNotifier;
use super::store::{with_timeout, RecordStore};

/// Progress of one mutation request, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    Received,
    Validated,
    Applied,
    Notified,
    NotificationSkippedOnError,
}

impl fmt::Display for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationStage::Received => "received",
            MutationStage::Validated => "validated",
            MutationStage::Applied => "applied",
            MutationStage::Notified => "notified",
            MutationStage::NotificationSkippedOnError => "notification-skipped",
        };
        f.write_str(name)
    }
}

pub struct MutationPipeline<S> {
    store: Arc<S>,
    notifier: ChangeNotifier,
    locks: KeyLocks,
    timeout: Duration,
}

impl<S: RecordStore> MutationPipeline<S> {
    pub fn new(store: Arc<S>, notifier: ChangeNotifier, locks: KeyLocks, timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            locks,
            timeout,
        }
    }

    /// Creates a record.
    ///
    /// # Errors
    /// `Validation` for a bad draft, `Conflict` when the id exists, `Storage` otherwise.
    pub async fn create(&self, draft: RecordDraft) -> Result<Record, RecordError> {
        trace_stage("create", "-", MutationStage::Received);
        let record = self.validated("create", draft.into_new_record())?;

        let _guard = self.locks.lock(record.id.as_str()).await;
        let stored = self.applied(
            "create",
            &record.id,
            with_timeout(self.timeout, self.store.insert(&record)).await,
        )?;

        info!("Record '{}' created", stored.id);
        self.notify("create", ChangeEvent::created(stored.clone()));
        Ok(stored)
    }

    /// Replaces every editable field of the record at `id`.
    ///
    /// # Errors
    /// `Validation` for a bad draft or id, `NotFound` when no row matches.
    pub async fn update(&self, id: &str, draft: RecordDraft) -> Result<Record, RecordError> {
        trace_stage("update", id, MutationStage::Received);
        let record = self.validated("update", draft.into_replacement(id))?;

        let _guard = self.locks.lock(record.id.as_str()).await;
        let updated = self.applied(
            "update",
            &record.id,
            with_timeout(self.timeout, self.store.update(&record)).await,
        )?;
        let stored = self.found("update", &record.id, updated)?;

        info!("Record '{}' updated", stored.id);
        self.notify("update", ChangeEvent::updated(stored.clone()));
        Ok(stored)
    }

    /// Deletes the record at `id` and returns the removed row.
    ///
    /// # Errors
    /// `Validation` for a blank id, `NotFound` when no row matches.
    pub async fn delete(&self, id: &str) -> Result<Record, RecordError> {
        trace_stage("delete", id, MutationStage::Received);
        let id = self.validated("delete", validate_id(id))?;

        let _guard = self.locks.lock(id.as_str()).await;
        let removed = self.applied(
            "delete",
            &id,
            with_timeout(self.timeout, self.store.delete(&id)).await,
        )?;
        let stored = self.found("delete", &id, removed)?;

        info!("Record '{}' deleted", stored.id);
        self.notify("delete", ChangeEvent::deleted(stored.id.clone()));
        Ok(stored)
    }

    fn validated<T>(&self, op: &str, result: Result<T, RecordError>) -> Result<T, RecordError> {
        match result {
            Ok(value) => {
                trace_stage(op, "-", MutationStage::Validated);
                Ok(value)
            }
            Err(e) => {
                debug!("{} rejected: {}", op, e);
                trace_stage(op, "-", MutationStage::NotificationSkippedOnError);
                Err(e)
            }
        }
    }

    fn applied<T>(
        &self,
        op: &str,
        id: &str,
        result: Result<T, StoreError>,
    ) -> Result<T, RecordError> {
        match result {
            Ok(value) => {
                trace_stage(op, id, MutationStage::Applied);
                Ok(value)
            }
            Err(e) => {
                let err = RecordError::from(e);
                match &err {
                    RecordError::Conflict(_) => debug!("{} of '{}' conflicted", op, id),
                    other => warn!("{} of '{}' failed in storage: {}", op, id, other),
                }
                trace_stage(op, id, MutationStage::NotificationSkippedOnError);
                Err(err)
            }
        }
    }

    fn found(&self, op: &str, id: &str, row: Option<Record>) -> Result<Record, RecordError> {
        row.ok_or_else(|| {
            debug!("{} of '{}' matched no row", op, id);
            trace_stage(op, id, MutationStage::NotificationSkippedOnError);
            RecordError::NotFound(id.to_string())
        })
    }

    fn notify(&self, op: &str, event: ChangeEvent) {
        let id = event.data.id().to_string();
        self.notifier.notify(event);
        trace_stage(op, &id, MutationStage::Notified);
    }
}

fn trace_stage(op: &str, id: &str, stage: MutationStage) {
    debug!("{} '{}': {}", op, id, stage);
}
