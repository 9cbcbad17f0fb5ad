use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::ops::compute::{CompResult, Op};
use tokio::task::AbortHandle;

use crate::{MemoKey, Outcome};

/// An item saved in the in-memory moka cache.
///
/// Expiration is tracked here rather than by moka, so that a sweep sees (and counts) exactly
/// the entries whose deadline has passed.
#[derive(Clone, Debug)]
struct StoreEntry {
    /// When to evict this entry, `None` if it never expires.
    deadline: Option<Instant>,
    /// The memoized result.
    outcome: Outcome,
}

impl StoreEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.is_none_or(|deadline| deadline > now)
    }
}

/// Aborts the background sweep once the last handle to the store is gone.
#[derive(Debug)]
struct SweepGuard(AbortHandle);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An unbounded in-memory store whose entries expire after a per-entry time-to-live.
///
/// Expired entries are never returned. They are purged by a periodic background sweep or by an
/// explicit [`sweep`](Self::sweep). There is no capacity limit, eviction is purely time-driven.
///
/// Cloning the store is cheap and yields a handle to the same entries.
#[derive(Clone)]
pub struct ExpiringStore<K: MemoKey> {
    entries: moka::sync::Cache<K, StoreEntry>,
    sweeper: Option<Arc<SweepGuard>>,
}

impl<K: MemoKey> std::fmt::Debug for ExpiringStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("entries", &self.entries.entry_count())
            .field("sweeping", &self.sweeper.is_some())
            .finish()
    }
}

impl<K: MemoKey> ExpiringStore<K> {
    /// Creates a new store, sweeping expired entries every `cleanup_interval`.
    ///
    /// The sweep runs as a task on the current Tokio runtime. A zero `cleanup_interval`, or
    /// creating the store outside of a runtime, disables it. Expired entries are never returned
    /// either way.
    pub fn new(cleanup_interval: Duration) -> Self {
        let mut store = Self {
            entries: moka::sync::Cache::builder().build(),
            sweeper: None,
        };
        store.sweeper = store.spawn_sweeper(cleanup_interval);
        store
    }

    fn spawn_sweeper(&self, cleanup_interval: Duration) -> Option<Arc<SweepGuard>> {
        if cleanup_interval.is_zero() {
            tracing::debug!("Background sweep disabled");
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No Tokio runtime available, expired entries are only purged by explicit sweeps");
            return None;
        };

        // the task must not keep the sweeper alive, so it works on a handle without one
        let store = Self {
            entries: self.entries.clone(),
            sweeper: None,
        };
        let task = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + cleanup_interval;
            let mut interval = tokio::time::interval_at(start, cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                store.sweep();
            }
        });

        Some(Arc::new(SweepGuard(task.abort_handle())))
    }

    /// Returns the memoized outcome for `key` if present and not yet expired.
    pub fn get(&self, key: &K) -> Option<Outcome> {
        let entry = self.entries.get(key)?;
        entry.is_live(Instant::now()).then_some(entry.outcome)
    }

    /// Inserts or overwrites the entry for `key`, expiring after `ttl`.
    ///
    /// A `ttl` that cannot be represented as an instant makes the entry never expire.
    pub fn set(&self, key: K, outcome: Outcome, ttl: Duration) {
        let deadline = Instant::now().checked_add(ttl);
        // goes through the per-key compute lock, so it serializes with the sweep's removals
        self.entries
            .entry(key)
            .and_upsert_with(|_| StoreEntry { deadline, outcome });
    }

    /// Removes the entry for `key`, if any.
    pub fn remove(&self, key: &K) {
        self.entries.invalidate(key);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Purges all expired entries right now, returning how many were removed.
    ///
    /// Each entry is checked and removed atomically, so an entry that is concurrently refreshed
    /// is never purged, and the sweep never holds a lock across more than one entry.
    pub fn sweep(&self) -> u64 {
        let now = Instant::now();
        let mut purged = 0;
        for (key, entry) in self.entries.iter() {
            if entry.is_live(now) {
                continue;
            }
            let result = self
                .entries
                .entry(K::clone(&key))
                .and_compute_with(|current| match current {
                    Some(current) if !current.value().is_live(now) => Op::Remove,
                    _ => Op::Nop,
                });
            if matches!(result, CompResult::Removed(_)) {
                purged += 1;
            }
        }
        self.entries.run_pending_tasks();

        metric!(counter("memoizer.sweep.purged") += purged as i64);
        tracing::debug!(purged, remaining = self.entries.entry_count(), "Swept expired entries");
        purged
    }

    /// The number of stored entries, including expired ones not yet swept.
    pub fn entry_count(&self) -> u64 {
        // moka only updates its counters when pending maintenance tasks have run
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}
