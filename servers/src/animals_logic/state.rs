use std::sync::Arc;
use std::time::Duration;

use lib_common::records::{RecordService, RecordStore};

/// Shared state handed to every route. The service (and with it the
/// subscriber registry) is owned here and passed explicitly, never global.
pub struct AppState<S> {
    pub service: Arc<RecordService<S>>,
    pub sse_keep_alive: Duration,
}

impl<S: RecordStore> AppState<S> {
    pub fn new(service: Arc<RecordService<S>>, sse_keep_alive: Duration) -> Self {
        Self {
            service,
            sse_keep_alive,
        }
    }
}

// Manual impl: `S` itself need not be `Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            sse_keep_alive: self.sse_keep_alive,
        }
    }
}
