use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::RecordError;
use super::events::ChangeEvent;
use super::model::{validate_id, Record};
use super::notifier::ChangeNotifier;
use super::store::{with_timeout, RecordStore};

/// Resolves RFID reads to records and announces each hit to live observers.
pub struct TagScanner<S> {
    store: Arc<S>,
    notifier: ChangeNotifier,
    timeout: Duration,
}

impl<S: RecordStore> TagScanner<S> {
    pub fn new(store: Arc<S>, notifier: ChangeNotifier, timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            timeout,
        }
    }

    /// Looks up `tag_id`. A hit broadcasts a `scanned` event; a miss broadcasts nothing.
    pub async fn scan(&self, tag_id: &str) -> Result<Record, RecordError> {
        let id = validate_id(tag_id)?;
        let found = with_timeout(self.timeout, self.store.get(&id)).await?;

        match found {
            Some(record) => {
                info!("Tag '{}' scanned: {} ({})", id, record.name, record.species);
                self.notifier.notify(ChangeEvent::scanned(record.clone()));
                Ok(record)
            }
            None => {
                debug!("Tag '{}' scanned but no record matches", id);
                Err(RecordError::NotFound(id))
            }
        }
    }
}
