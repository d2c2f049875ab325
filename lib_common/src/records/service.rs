//! # Record Service
//!
//! Wires one store into the query engine, mutation pipeline and tag scanner,
//! all sharing a single [`ChangeNotifier`]. The server owns one `RecordService`
//! and passes it to handlers explicitly; there is no global registry.

use std::sync::Arc;
use std::time::Duration;

use crate::core::dispatcher::DispatcherLimits;
use crate::core::key_locks::{KeyLocks, DEFAULT_STRIPES};

use super::mutation::MutationPipeline;
use super::notifier::ChangeNotifier;
use super::query::{PageLimits, QueryEngine};
use super::scan::TagScanner;
use super::store::RecordStore;

/// Tunables for [`RecordService::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Upper bound for every individual store call.
    pub store_timeout: Duration,
    pub page_limits: PageLimits,
    pub subscriber_limits: DispatcherLimits,
    pub lock_stripes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            page_limits: PageLimits::default(),
            subscriber_limits: DispatcherLimits::default(),
            lock_stripes: DEFAULT_STRIPES,
        }
    }
}

pub struct RecordService<S> {
    store: Arc<S>,
    query: QueryEngine<S>,
    mutations: MutationPipeline<S>,
    scanner: TagScanner<S>,
    notifier: ChangeNotifier,
}

impl<S: RecordStore> RecordService<S> {
    pub fn new(store: S, settings: ServiceSettings) -> Self {
        let store = Arc::new(store);
        let notifier = ChangeNotifier::new(settings.subscriber_limits);

        Self {
            query: QueryEngine::new(Arc::clone(&store), settings.page_limits, settings.store_timeout),
            mutations: MutationPipeline::new(
                Arc::clone(&store),
                notifier.clone(),
                KeyLocks::new(settings.lock_stripes),
                settings.store_timeout,
            ),
            scanner: TagScanner::new(Arc::clone(&store), notifier.clone(), settings.store_timeout),
            notifier,
            store,
        }
    }

    pub fn query(&self) -> &QueryEngine<S> {
        &self.query
    }

    pub fn mutations(&self) -> &MutationPipeline<S> {
        &self.mutations
    }

    pub fn scanner(&self) -> &TagScanner<S> {
        &self.scanner
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
