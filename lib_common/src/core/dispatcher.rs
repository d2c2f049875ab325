//! # Bounded Fan-out Dispatcher
//!
//! The `Dispatcher` takes one item and hands it to every connected client. It is
//! the subscriber registry of the service: clients join with [`Dispatcher::add_client`],
//! leave by dropping their [`Subscription`] (or via [`Dispatcher::remove_client`]),
//! and receive every item passed to [`Dispatcher::broadcast`].
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: items travel as `Arc<T>`. Each client receives a new
//!     pointer to the *same* allocation.
//!
//! 2.  **Bounded Queues**: every client owns a bounded MPSC queue. `broadcast` only
//!     ever calls `try_send`, so it never waits on a client. A client whose queue is
//!     full is evicted: its sender is dropped, its stream ends once the backlog is
//!     drained, and it is expected to reconnect and resynchronise.
//!
//! 3.  **Failure Isolation**: a closed or full queue only affects its own client.
//!     Closed clients are pruned lazily during the broadcast that discovers them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Default number of simultaneously connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 1024;
/// Default depth of each client's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors returned when a client cannot join the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("subscriber limit of {0} reached")]
    CapacityReached(usize),
    #[error("dispatcher is closed")]
    Closed,
}

/// Sizing limits applied to a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherLimits {
    /// Maximum number of registered clients.
    pub max_clients: usize,
    /// Per-client queue depth. Values below 1 are treated as 1.
    pub queue_capacity: usize,
}

impl Default for DispatcherLimits {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Opaque identifier handed out on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outcome counters for a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients whose queue accepted the item.
    pub delivered: usize,
    /// Clients evicted because their queue was full.
    pub evicted_slow: usize,
    /// Clients pruned because their receiver was already gone.
    pub pruned_closed: usize,
}

/// # Client Handle
///
/// The dispatcher's side of one connected client.
struct ClientHandle<T> {
    /// Human-readable origin, e.g. `sse-127.0.0.1:51234`.
    label: String,
    /// Sending half of the client's bounded queue.
    sender: mpsc::Sender<Arc<T>>,
    connected_at: Instant,
}

/// # Core Dispatcher
///
/// Manages registration, deregistration and broadcasting of `Arc<T>` items.
pub struct Dispatcher<T> {
    clients: Mutex<HashMap<ClientId, ClientHandle<T>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    limits: DispatcherLimits,
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    /// Creates a new, shareable dispatcher.
    pub fn new(limits: DispatcherLimits) -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            limits,
        })
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientHandle<T>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add Client
    ///
    /// Registers a new client and returns its [`Subscription`]. Dropping the
    /// subscription unregisters the client.
    ///
    /// # Errors
    /// - [`DispatchError::CapacityReached`] when `max_clients` are already connected.
    /// - [`DispatchError::Closed`] after [`Dispatcher::close_all`].
    pub fn add_client(self: &Arc<Self>, label: &str) -> Result<Subscription<T>, DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.limits.queue_capacity.max(1));
        let mut clients = self.lock_clients();
        // close_all may have cleared the map while we waited for the lock.
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        if clients.len() >= self.limits.max_clients {
            warn!(
                "Rejecting client '{}': limit of {} subscribers reached",
                label, self.limits.max_clients
            );
            return Err(DispatchError::CapacityReached(self.limits.max_clients));
        }

        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        clients.insert(
            id,
            ClientHandle {
                label: label.to_string(),
                sender: tx,
                connected_at: Instant::now(),
            },
        );
        info!("Client '{}' registered as {} ({} connected)", label, id, clients.len());

        Ok(Subscription {
            id,
            receiver: rx,
            dispatcher: Arc::downgrade(self),
        })
    }

    /// # Broadcast
    ///
    /// Offers `item` to every registered client without waiting on any of them.
    /// Clients whose receiver is gone, or whose queue is full, are removed in the
    /// same pass.
    pub fn broadcast(&self, item: Arc<T>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut clients = self.lock_clients();

        clients.retain(|id, client| match client.sender.try_send(Arc::clone(&item)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Client '{}' ({}) is not draining its queue after {:?}. Disconnecting it.",
                    client.label,
                    id,
                    client.connected_at.elapsed()
                );
                report.evicted_slow += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                info!("Client '{}' ({}) disconnected. Removing from dispatcher.", client.label, id);
                report.pruned_closed += 1;
                false
            }
        });

        debug!(
            "Broadcast delivered to {}, evicted {}, pruned {}",
            report.delivered, report.evicted_slow, report.pruned_closed
        );
        report
    }

    /// Removes a specific client. Returns `false` if it was already gone.
    pub fn remove_client(&self, id: ClientId) -> bool {
        let removed = self.lock_clients().remove(&id);
        match removed {
            Some(client) => {
                info!("Client '{}' ({}) explicitly removed.", client.label, id);
                true
            }
            None => false,
        }
    }

    /// Returns `true` while `id` is registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.lock_clients().contains_key(&id)
    }

    /// Number of currently registered clients.
    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    /// Ends every client stream and refuses new registrations.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let mut clients = self.lock_clients();
        let count = clients.len();
        clients.clear();
        info!("Dispatcher closed, {} clients released", count);
    }
}

/// # Subscription
///
/// The client's side of a registration: a bounded receiver plus a back-reference
/// used to unregister on drop.
pub struct Subscription<T: Send + Sync + 'static> {
    id: ClientId,
    receiver: mpsc::Receiver<Arc<T>>,
    dispatcher: Weak<Dispatcher<T>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Waits for the next item. `None` means the dispatcher released this client
    /// (eviction, `close_all`) and no queued items remain.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        self.receiver.try_recv().ok()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove_client(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_clients: usize, queue_capacity: usize) -> DispatcherLimits {
        DispatcherLimits {
            max_clients,
            queue_capacity,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let dispatcher = Dispatcher::<String>::new(DispatcherLimits::default());
        let mut a = dispatcher.add_client("a").unwrap();
        let mut b = dispatcher.add_client("b").unwrap();

        let report = dispatcher.broadcast(Arc::new("hello".to_string()));
        assert_eq!(report.delivered, 2);

        assert_eq!(a.recv().await.as_deref().map(String::as_str), Some("hello"));
        assert_eq!(b.recv().await.as_deref().map(String::as_str), Some("hello"));
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let dispatcher = Dispatcher::<u32>::new(DispatcherLimits::default());
        let sub = dispatcher.add_client("gone").unwrap();
        let id = sub.id();
        assert!(dispatcher.contains(id));

        drop(sub);
        assert!(!dispatcher.contains(id));
        assert_eq!(dispatcher.client_count(), 0);
    }

    #[test]
    fn full_queue_evicts_only_the_slow_client() {
        let dispatcher = Dispatcher::<u32>::new(limits(8, 1));
        let slow = dispatcher.add_client("slow").unwrap();
        let mut fast = dispatcher.add_client("fast").unwrap();

        assert_eq!(dispatcher.broadcast(Arc::new(1)).delivered, 2);
        assert_eq!(fast.try_recv().as_deref(), Some(&1));

        let report = dispatcher.broadcast(Arc::new(2));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted_slow, 1);
        assert!(!dispatcher.contains(slow.id()));
        assert!(dispatcher.contains(fast.id()));
        assert_eq!(fast.try_recv().as_deref(), Some(&2));
    }

    #[tokio::test]
    async fn evicted_client_drains_backlog_then_ends() {
        let dispatcher = Dispatcher::<u32>::new(limits(8, 1));
        let mut slow = dispatcher.add_client("slow").unwrap();

        dispatcher.broadcast(Arc::new(1));
        dispatcher.broadcast(Arc::new(2));

        assert_eq!(slow.recv().await.as_deref(), Some(&1));
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn closed_receiver_is_pruned_on_next_broadcast() {
        let dispatcher = Dispatcher::<u32>::new(DispatcherLimits::default());
        let mut leaver = dispatcher.add_client("leaver").unwrap();
        let id = leaver.id();
        let mut stayer = dispatcher.add_client("stayer").unwrap();
        leaver.receiver.close();

        assert!(dispatcher.contains(id));
        let report = dispatcher.broadcast(Arc::new(7));
        assert_eq!(report.pruned_closed, 1);
        assert_eq!(report.delivered, 1);
        assert!(!dispatcher.contains(id));
        assert_eq!(stayer.try_recv().as_deref(), Some(&7));
    }

    #[test]
    fn capacity_limit_rejects_extra_clients() {
        let dispatcher = Dispatcher::<u32>::new(limits(1, 4));
        let _first = dispatcher.add_client("first").unwrap();
        let err = dispatcher.add_client("second").err();
        assert_eq!(err, Some(DispatchError::CapacityReached(1)));
    }

    #[tokio::test]
    async fn close_all_ends_streams_and_rejects_new_clients() {
        let dispatcher = Dispatcher::<u32>::new(DispatcherLimits::default());
        let mut sub = dispatcher.add_client("listener").unwrap();

        dispatcher.close_all();
        assert!(sub.recv().await.is_none());
        assert_eq!(dispatcher.add_client("late").err(), Some(DispatchError::Closed));
    }

    #[test]
    fn registrations_racing_close_all_are_released() {
        for _ in 0..50 {
            let dispatcher = Dispatcher::<u32>::new(DispatcherLimits::default());
            let joiners: Vec<_> = (0..4)
                .map(|i| {
                    let dispatcher = Arc::clone(&dispatcher);
                    std::thread::spawn(move || {
                        (0..64)
                            .filter_map(|_| dispatcher.add_client(&format!("joiner-{}", i)).ok())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            dispatcher.close_all();

            let mut survivors = Vec::new();
            for joiner in joiners {
                survivors.extend(joiner.join().unwrap());
            }
            assert_eq!(dispatcher.client_count(), 0);
            for sub in &mut survivors {
                assert!(sub.receiver.is_closed());
            }
        }
    }
}
