use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use memoizer::{ComputationError, Memoizer, MemoizerConfig, Value};
use memoizer_test::memoizer_config;
use tokio::sync::Barrier;

use crate::{Counter, as_usize};

/// Spawns `callers` tasks memoizing `key` at roughly the same time, with a computation taking
/// `latency`. Returns how often the computation ran.
async fn contend(callers: usize, latency: Duration) -> usize {
    let memoizer: Arc<Memoizer> = Arc::new(Memoizer::from_config(&memoizer_config()));
    let counter = Counter::default();
    let barrier = Arc::new(Barrier::new(callers));

    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let memoizer = Arc::clone(&memoizer);
            let counter = counter.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                memoizer
                    .memoize("key1", move || async move {
                        if !latency.is_zero() {
                            tokio::time::sleep(latency).await;
                        }
                        counter.bump()
                    })
                    .await
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        let memoized = task.unwrap();
        assert!(memoized.result.is_ok());
    }
    assert_eq!(memoizer.in_flight(), 0);

    counter.get()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_dedup_slow_computation() {
    memoizer_test::setup();

    let computations = contend(1000, Duration::from_millis(10)).await;
    assert!(computations >= 1);
    assert!(computations <= 10, "computed {computations} times");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_dedup_instant_computation() {
    memoizer_test::setup();

    let computations = contend(10_000, Duration::ZERO).await;
    assert!(computations >= 1);
    assert!(computations <= 500, "computed {computations} times");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_followers_share_round() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());
    let counter = Counter::default();
    let (release, blocked) = tokio::sync::oneshot::channel::<()>();

    let leader = memoizer.memoize("key1", {
        let counter = counter.clone();
        move || async move {
            blocked.await.ok();
            counter.bump()
        }
    });
    let followers = async {
        // give the leader a chance to register its computation
        while memoizer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let mut followers = std::pin::pin!(futures::future::join_all(
            (0..10).map(|_| memoizer.memoize("key1", counter.computation())),
        ));
        // polling once makes all of them join the in-flight computation
        assert!(futures::poll!(followers.as_mut()).is_pending());
        release.send(()).unwrap();
        followers.await
    };

    let (leader, followers) = futures::join!(leader, followers);
    assert!(!leader.cached);
    let value = leader.result.unwrap();
    for follower in followers {
        assert!(!follower.cached);
        assert!(follower.result.unwrap().ptr_eq(&value));
    }
    assert_eq!(counter.get(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_followers_share_failure() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());
    let counter = Counter::default();

    let results = futures::future::join_all((0..10).map(|_| {
        let counter = counter.clone();
        memoizer.memoize("key1", move || async move {
            counter.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Value, _>(ComputationError::msg("Try again"))
        })
    }))
    .await;

    assert_eq!(counter.get(), 1);
    let first = results[0].result.as_ref().unwrap_err();
    for memoized in &results {
        assert!(!memoized.cached);
        assert!(memoized.result.as_ref().unwrap_err().ptr_eq(first));
    }

    // the failure is not cached, so the next call runs again
    let memoized = memoizer.memoize("key1", counter.computation()).await;
    assert!(!memoized.cached);
    assert_eq!(as_usize(&memoized.result), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_key_does_not_block_others() {
    memoizer_test::setup();

    let memoizer: Arc<Memoizer> = Arc::new(Memoizer::from_config(&MemoizerConfig {
        coordinator_shards: 1,
        ..memoizer_config()
    }));
    let (release, blocked) = tokio::sync::oneshot::channel::<()>();

    let slow = {
        let memoizer = Arc::clone(&memoizer);
        tokio::spawn(async move {
            memoizer
                .memoize("slow", move || async move {
                    blocked.await.ok();
                    Ok::<_, ComputationError>(Value::new(0usize))
                })
                .await
        })
    };
    while memoizer.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    // even with a single shard, other keys complete while "slow" is in flight
    let counter = Counter::default();
    for key in ["key1", "key2", "key3"] {
        let memoized = memoizer.memoize(key, counter.computation()).await;
        assert!(!memoized.cached);
    }
    assert_eq!(counter.get(), 3);
    assert_eq!(memoizer.in_flight(), 1);

    release.send(()).unwrap();
    let slow = slow.await.unwrap();
    assert_eq!(as_usize(&slow.result), 0);
}

#[tokio::test]
async fn test_panicking_computation() {
    memoizer_test::setup();

    fn explode() -> Result<Value, ComputationError> {
        panic!("computation failed hard")
    }

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());
    let memoized = memoizer
        .memoize("key1", || async {
            tokio::task::yield_now().await;
            explode()
        })
        .await;
    assert!(!memoized.cached);
    assert!(memoized.result.unwrap_err().is_abandoned());
    assert_eq!(memoizer.in_flight(), 0);

    // the key is free to be computed again
    let counter = Counter::default();
    let memoized = memoizer.memoize("key1", counter.computation()).await;
    assert_eq!(as_usize(&memoized.result), 1);
}
