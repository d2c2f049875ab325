//! # Change Notifier
//!
//! Wraps the core [`Dispatcher`] for [`ChangeEvent`]s. `notify` only hands the
//! event to each subscriber's bounded queue, so it returns immediately; the
//! actual socket writes happen in the per-connection tasks that drain those
//! queues. Events are never stored: a subscriber that connects later sees only
//! later events and reconciles by listing.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::dispatcher::{
    BroadcastReport, DispatchError, Dispatcher, DispatcherLimits, Subscription,
};

use super::events::ChangeEvent;

/// A live feed of change events for one observer.
pub type ChangeSubscription = Subscription<ChangeEvent>;

#[derive(Clone)]
pub struct ChangeNotifier {
    dispatcher: Arc<Dispatcher<ChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new(limits: DispatcherLimits) -> Self {
        Self {
            dispatcher: Dispatcher::new(limits),
        }
    }

    /// Registers an observer. `label` identifies it in logs.
    pub fn subscribe(&self, label: &str) -> Result<ChangeSubscription, DispatchError> {
        self.dispatcher.add_client(label)
    }

    /// Fans `event` out to every current subscriber.
    pub fn notify(&self, event: ChangeEvent) -> BroadcastReport {
        let kind = event.event;
        let id = event.data.id().to_string();
        let report = self.dispatcher.broadcast(Arc::new(event));

        if report.evicted_slow > 0 {
            warn!(
                "Event {} for '{}' evicted {} slow subscribers",
                kind, id, report.evicted_slow
            );
        }
        debug!(
            "Event {} for '{}' queued for {} subscribers",
            kind, id, report.delivered
        );
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.client_count()
    }

    /// Ends all live feeds; used on shutdown.
    pub fn close(&self) {
        self.dispatcher.close_all();
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DispatcherLimits::default())
    }
}
