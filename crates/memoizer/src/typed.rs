use std::any::{Any, type_name};
use std::future::Future;

use futures::TryFutureExt;

use crate::{CallError, MemoKey, Memoized, Memoizer, Value};

impl<K: MemoKey> Memoizer<K> {
    /// Returns the result for `key` as a `T`, computing it with `f` if needed.
    ///
    /// This is the typed counterpart of [`memoize`](Self::memoize), with the same deduplication
    /// and caching behavior. If the result stored or computed for `key` is not a `T`, because
    /// the key was previously used with a different type, this returns a
    /// [`CallError::TypeMismatch`] instead of panicking.
    pub async fn call<T, F, Fut, E>(&self, key: impl Into<K>, f: F) -> Memoized<T, CallError>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        let Memoized { result, cached } = self
            .memoize(key, move || f().map_ok(Value::new::<T>))
            .await;

        let result = match result {
            Ok(value) => value.downcast::<T>().map_err(|found| {
                tracing::error!(
                    expected = type_name::<T>(),
                    found,
                    "Memoized value has an unexpected type"
                );
                CallError::TypeMismatch {
                    expected: type_name::<T>(),
                    found,
                }
            }),
            Err(err) => Err(CallError::Computation(err)),
        };

        Memoized { result, cached }
    }
}
