//! # Striped Key Locks
//!
//! A fixed pool of async mutexes indexed by the hash of a key. Two callers
//! holding the same key always contend for the same stripe, so work on one key
//! is serialised in lock-acquisition order. Distinct keys usually land on
//! different stripes and proceed concurrently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// Stripe count used by [`KeyLocks::default`].
pub const DEFAULT_STRIPES: usize = 64;

/// Striped mutex pool keyed by any hashable value.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    /// Creates a pool with `stripes` mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Waits for exclusive access to `key`'s stripe. The stripe is released when
    /// the returned guard is dropped.
    pub async fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(key)].lock().await
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
