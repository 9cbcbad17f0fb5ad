use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture, FutureExt};

use crate::config::MemoizerConfig;
use crate::coordinator::CallCoordinator;
use crate::store::ExpiringStore;
use crate::{ComputationError, MemoKey, Outcome, Value};

/// The result of a memoized call, together with whether it was served from the cache.
#[derive(Clone, Debug)]
#[must_use]
pub struct Memoized<T, E = ComputationError> {
    /// The value or error of the computation.
    pub result: Result<T, E>,
    /// `true` if the result was read from a previously stored entry, `false` if it was freshly
    /// computed for this caller (as leader or follower of that computation).
    pub cached: bool,
}

impl<T, E> Memoized<T, E> {
    /// Splits into the result and the cached flag.
    pub fn into_parts(self) -> (Result<T, E>, bool) {
        (self.result, self.cached)
    }

    /// Discards the cached flag.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    /// Whether the result was served from a previously stored entry.
    pub fn was_cached(&self) -> bool {
        self.cached
    }
}

/// The output of one leader/follower round of a computation.
#[derive(Clone, Debug)]
struct Round {
    outcome: Outcome,
    cached: bool,
}

/// Memoizes the results of computations by key.
///
/// A [`Memoizer`] owns an [`ExpiringStore`] holding finished results, and a [`CallCoordinator`]
/// deduplicating computations that are currently running. On a cache miss, exactly one caller
/// runs the computation while concurrent callers for the same key wait for its result.
///
/// Successful results are stored for [`MemoizerConfig::default_expiration`]. Failed
/// computations are only stored if [`MemoizerConfig::cache_errors`] is enabled, otherwise the
/// next call runs the computation again.
///
/// There is no global instance: create one and share it by reference (or in an [`Arc`]) with all
/// callers that should share results.
pub struct Memoizer<K: MemoKey = String> {
    name: Arc<str>,
    default_expiration: Duration,
    cache_errors: bool,
    store: ExpiringStore<K>,
    coordinator: CallCoordinator<K, Round>,
}

impl<K: MemoKey> std::fmt::Debug for Memoizer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("name", &self.name)
            .field("default_expiration", &self.default_expiration)
            .field("cache_errors", &self.cache_errors)
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl<K: MemoKey> Memoizer<K> {
    /// Creates a memoizer whose results expire after `default_expiration`, and which purges
    /// expired results every `cleanup_interval`.
    ///
    /// All other settings keep their [`MemoizerConfig`] defaults.
    pub fn new(default_expiration: Duration, cleanup_interval: Duration) -> Self {
        Self::from_config(&MemoizerConfig {
            default_expiration,
            cleanup_interval,
            ..Default::default()
        })
    }

    /// Creates a memoizer from the given configuration.
    ///
    /// The background sweep runs on the current Tokio runtime, see [`ExpiringStore::new`].
    pub fn from_config(config: &MemoizerConfig) -> Self {
        let name: Arc<str> = config.name.as_str().into();
        Self {
            default_expiration: config.default_expiration,
            cache_errors: config.cache_errors,
            store: ExpiringStore::new(config.cleanup_interval),
            coordinator: CallCoordinator::new(Arc::clone(&name), config.coordinator_shards),
            name,
        }
    }

    /// Returns the result for `key`, computing it with `f` if there is no live cached result.
    ///
    /// If a computation for `key` is already running, this waits for its result instead of
    /// invoking `f`. The computation is spawned on the current Tokio runtime and always runs to
    /// completion, even if this future is dropped.
    ///
    /// Errors returned by `f` are handed verbatim to every caller that waited for them.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub async fn memoize<F, Fut, E>(&self, key: impl Into<K>, f: F) -> Memoized<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        let key = key.into();
        let name = self.name.as_ref();
        metric!(counter("memoizer.access") += 1, "memoizer" => name);

        if let Some(outcome) = self.store.get(&key) {
            metric!(counter("memoizer.hit") += 1, "memoizer" => name);
            tracing::trace!(?key, "Memoized result found");
            return Memoized {
                result: outcome,
                cached: true,
            };
        }

        let computation = {
            let key = key.clone();
            move || self.start_round(key, f)
        };

        match self.coordinator.run_or_join(key, computation).await {
            Ok(Round { outcome, cached }) => Memoized {
                result: outcome,
                cached,
            },
            Err(abandoned) => Memoized {
                result: Err(ComputationError::new(abandoned)),
                cached: false,
            },
        }
    }

    /// Starts a round as the newly elected leader for `key`.
    ///
    /// A previous leader may have stored its result after the caller's lookup, in which case that
    /// result is returned without invoking `f`.
    fn start_round<F, Fut, E>(&self, key: K, f: F) -> BoxFuture<'static, Round>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        if let Some(outcome) = self.store.get(&key) {
            metric!(counter("memoizer.hit") += 1, "memoizer" => self.name.as_ref());
            return future::ready(Round {
                outcome,
                cached: true,
            })
            .boxed();
        }

        let computation = f();
        let store = self.store.clone();
        let name = Arc::clone(&self.name);
        let ttl = self.default_expiration;
        let cache_errors = self.cache_errors;

        async move {
            let start = Instant::now();
            let outcome = computation.await.map_err(ComputationError::new);
            metric!(timer("memoizer.computation.duration") = start.elapsed(), "memoizer" => name.as_ref());
            metric!(
                counter("memoizer.computation") += 1,
                "memoizer" => name.as_ref(),
                "status" => if outcome.is_ok() { "ok" } else { "error" },
            );

            // Storing happens before the in-flight call is deregistered, so the next leader for
            // this key already sees the result.
            if outcome.is_ok() || cache_errors {
                store.set(key, outcome.clone(), ttl);
            }

            Round {
                outcome,
                cached: false,
            }
        }
        .boxed()
    }

    /// Removes the cached result for `key`, so that the next call computes it again.
    ///
    /// A computation that is currently in flight is not affected and will store its result.
    pub fn forget(&self, key: impl Into<K>) {
        self.store.remove(&key.into());
    }

    /// Removes all cached results.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// The number of cached results, including expired ones not yet swept.
    pub fn cached_entries(&self) -> u64 {
        self.store.entry_count()
    }

    /// The number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    /// The store holding finished results.
    pub fn store(&self) -> &ExpiringStore<K> {
        &self.store
    }
}
