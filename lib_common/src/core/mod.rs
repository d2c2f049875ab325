//! # Core Engine Module
//!
//! Concurrency primitives shared by the record service.
//!
//! ## Core Components:
//!
//! - **`dispatcher`**: the zero-copy broadcaster. It hands every item to all
//!   registered clients through bounded queues and evicts clients that stop
//!   draining them.
//!
//! - **`key_locks`**: striped async locks that serialise work on the same key
//!   while letting unrelated keys proceed in parallel.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The bounded, zero-copy broadcaster for distributing items to clients.
pub mod dispatcher;
/// Striped per-key async locks.
pub mod key_locks;

// --- Public API Re-exports ---
pub use dispatcher::{
    BroadcastReport, ClientId, DispatchError, Dispatcher, DispatcherLimits, Subscription,
};
pub use key_locks::KeyLocks;
