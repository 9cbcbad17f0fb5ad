use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};
use sentry::{Hub, SentryFutureExt};

use crate::utils::defer::defer;
use crate::{Abandoned, MemoKey};

type ComputationChannel<T> = Shared<oneshot::Receiver<T>>;
type Shard<K, T> = CachePadded<Mutex<FxHashMap<K, ComputationChannel<T>>>>;

/// Deduplicates concurrent computations for the same key.
///
/// The first caller for a key becomes the *leader*: its computation is spawned as a separate
/// task and registered under the key. Every caller arriving while that computation is in flight
/// becomes a *follower* and awaits the very same result instead of computing it again.
///
/// In-flight computations are tracked in a number of independently locked shards, so distinct
/// keys rarely contend on the same lock.
pub struct CallCoordinator<K, T> {
    name: Arc<str>,
    shards: Arc<[Shard<K, T>]>,
    hasher: FxBuildHasher,
}

impl<K, T> Clone for CallCoordinator<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            shards: Arc::clone(&self.shards),
            hasher: self.hasher,
        }
    }
}

impl<K: MemoKey, T: Clone + Send + Sync + 'static> std::fmt::Debug for CallCoordinator<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("name", &self.name)
            .field("shards", &self.shards.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<K, T> CallCoordinator<K, T>
where
    K: MemoKey,
    T: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator with the given number of shards, which is clamped to at least `1`.
    ///
    /// The `name` is used to tag metrics.
    pub fn new(name: impl Into<Arc<str>>, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| CachePadded::new(Mutex::new(FxHashMap::default())))
            .collect();
        Self {
            name: name.into(),
            shards,
            hasher: FxBuildHasher,
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    /// Runs `computation` for `key`, or joins the computation that is already in flight.
    ///
    /// The leader spawns the future returned by `computation` on the current Tokio runtime, so it
    /// runs to completion even if the calling future is dropped. The leader and all followers
    /// resolve to a clone of the same output.
    ///
    /// Returns [`Abandoned`] if the computation panicked before producing a result.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub async fn run_or_join<F, Fut>(&self, key: K, computation: F) -> Result<T, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = self.name.as_ref();
        let index = self.shard_index(&key);

        let (channel, sender) = {
            let mut current_computations = self.shards[index].lock();
            if let Some(channel) = current_computations.get(&key) {
                // A concurrent computation was deduplicated.
                metric!(counter("memoizer.coalesced") += 1, "memoizer" => name);
                tracing::trace!(?key, "Joining in-flight computation");
                (channel.clone(), None)
            } else {
                let (sender, receiver) = oneshot::channel();
                let channel = receiver.shared();
                let evicted = current_computations.insert(key.clone(), channel.clone());
                debug_assert!(evicted.is_none());
                (channel, Some(sender))
            }
        };

        match sender {
            Some(sender) => {
                tracing::trace!(?key, "Spawning deduplicated computation");
                self.spawn_leader(index, key.clone(), sender, computation);
            }
            // not held across the await below
            None => drop(computation),
        }

        channel.await.map_err(|_cancelled| {
            tracing::error!(?key, "In-flight computation was abandoned");
            Abandoned
        })
    }

    /// Spawns the leader computation, which publishes its output on `sender` and deregisters the
    /// in-flight call for `key`.
    fn spawn_leader<F, Fut>(
        &self,
        index: usize,
        key: K,
        sender: oneshot::Sender<T>,
        computation: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shards = Arc::clone(&self.shards);
        // Runs on completion as well as on unwinding, so the key never stays registered.
        let remove_computation_token = defer(move || {
            shards[index].lock().remove(&key);
        });

        let computation = computation();
        let task = async move {
            let result = computation.await;

            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_computation_token);
            sender.send(result).ok();
        }
        // Bind a fresh hub, the computation outlives the scope of the leader.
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(task);
    }

    /// The number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}
