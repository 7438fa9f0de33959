//! Process-local per-series locks
//!
//! Serializes same-process writers on one series before they reach the
//! store. Entries are never removed; one `Arc<Mutex<()>>` per series name
//! ever written in this process.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Lazily created mutex per series name
#[derive(Debug, Default)]
pub struct SeriesLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SeriesLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `name`, created on first use
    pub fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(name) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Run `f` while holding the lock for `name`
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(name);
        let _guard = lock.lock();
        f()
    }

    /// Number of series with a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no lock was created yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
