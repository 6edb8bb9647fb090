//! Per-group lock (§4.E): cooperative mutual exclusion keyed by group
//! identifier, guaranteeing that at most one reduce is in flight per group
//! at any time within this process.
//!
//! Locks are process-local; cross-process isolation comes from the
//! single-writer-per-partition deployment shape (§5), not from anything
//! this type does.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of per-group mutexes, created lazily on first acquisition.
#[derive(Default)]
pub struct GroupLock {
    table: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `group`, suspending until any current holder
    /// releases it. The returned guard releases the lock on drop — every
    /// exit path out of the protected region, including an early `?`
    /// return or a panic unwinding through it, releases the lock.
    pub async fn acquire(&self, group: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .table
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        // Best-effort pruning: if we're the only reference left besides
        // the one in `table`, nobody else is waiting on this group, so
        // it's safe to drop the table entry once the guard itself drops.
        // A concurrent acquirer that grabs the Arc between this check and
        // the eventual removal just ends up sharing a mutex the next
        // acquire re-creates fresh for the group, which is still correct
        // (never two outstanding locks for the same group), only ever
        // wasteful.
        if Arc::strong_count(&mutex) == 2 {
            self.table.remove_if(group, |_, v| Arc::strong_count(v) <= 2);
        }
        guard
    }
}
