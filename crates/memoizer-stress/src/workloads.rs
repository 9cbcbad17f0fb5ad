use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use memoizer::{Memoizer, Value};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.workloads.is_empty() {
            return Err(WorkloadError::Empty);
        }
        self.workloads.iter().try_for_each(Workload::validate)
    }
}

/// A stream of memoized calls, issued by `concurrency` callers at a time.
#[derive(Clone, Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct keys, each call picks one at random.
    #[serde(default = "default_keys")]
    pub keys: u64,
    /// How long a single computation takes.
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
    /// The probability of a computation to fail, between `0` and `1`.
    #[serde(default)]
    pub failure_rate: f64,
}

/// Concurrency is bounded by the semaphore's permits, which are acquired all at once as `u32`.
const MAX_CONCURRENCY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

fn default_keys() -> u64 {
    1
}

impl Workload {
    fn validate(&self) -> Result<(), WorkloadError> {
        if self.concurrency == 0 {
            return Err(WorkloadError::NoConcurrency);
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(WorkloadError::TooMuchConcurrency(self.concurrency));
        }
        if self.keys == 0 {
            return Err(WorkloadError::NoKeys);
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(WorkloadError::FailureRate(self.failure_rate));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("no workloads defined")]
    Empty,
    #[error("workload concurrency must be at least 1")]
    NoConcurrency,
    #[error("workload concurrency {0} exceeds the maximum of {max}", max = MAX_CONCURRENCY)]
    TooMuchConcurrency(usize),
    #[error("workload needs at least 1 key")]
    NoKeys,
    #[error("failure rate {0} is not between 0 and 1")]
    FailureRate(f64),
}

/// The error of computations that were chosen to fail.
#[derive(Debug, Error)]
#[error("injected failure")]
pub struct InjectedFailure;

/// Issues a single memoized call for a random key of the workload.
///
/// Every computation that actually runs bumps `computations`. Returns whether the call succeeded.
pub async fn process_call(
    memoizer: &Memoizer<u64>,
    workload: &Workload,
    computations: &Arc<AtomicUsize>,
) -> bool {
    let (key, fail) = {
        let mut rng = rand::rng();
        (
            rng.random_range(0..workload.keys),
            rng.random_bool(workload.failure_rate),
        )
    };
    let latency = workload.latency;
    let computations = Arc::clone(computations);

    let memoized = memoizer
        .memoize(key, move || async move {
            computations.fetch_add(1, Ordering::Relaxed);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match fail {
                true => Err(InjectedFailure),
                false => Ok(Value::new(key)),
            }
        })
        .await;

    memoized.result.is_ok()
}
