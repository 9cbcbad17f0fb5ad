use std::time::Duration;

use memoizer::{Memoizer, MemoizerConfig};
use memoizer_test::memoizer_config;

use crate::{Counter, as_usize};

#[tokio::test]
async fn test_expiration() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::new(Duration::from_millis(50), Duration::ZERO);
    let counter = Counter::default();

    let memoized = memoizer.memoize("key1", counter.computation()).await;
    assert!(!memoized.cached);
    let memoized = memoizer.memoize("key1", counter.computation()).await;
    assert!(memoized.cached);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // no sweep ran, but the stale entry is never served
    let memoized = memoizer.memoize("key1", counter.computation()).await;
    assert!(!memoized.cached);
    assert_eq!(as_usize(&memoized.result), 2);
}

#[tokio::test]
async fn test_zero_expiration() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&MemoizerConfig {
        default_expiration: Duration::ZERO,
        ..memoizer_config()
    });
    let counter = Counter::default();

    for expected in 1..=3 {
        let memoized = memoizer.memoize("key1", counter.computation()).await;
        assert!(!memoized.cached);
        assert_eq!(as_usize(&memoized.result), expected);
    }
}

#[tokio::test]
async fn test_background_sweep() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&MemoizerConfig {
        default_expiration: Duration::from_millis(20),
        cleanup_interval: Duration::from_millis(30),
        ..memoizer_config()
    });
    let counter = Counter::default();

    for key in ["key1", "key2", "key3"] {
        let _ = memoizer.memoize(key, counter.computation()).await;
    }
    assert_eq!(memoizer.cached_entries(), 3);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(memoizer.cached_entries(), 0);
    assert_eq!(memoizer.store().sweep(), 0);
}

#[tokio::test]
async fn test_sweep_keeps_live_entries() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&MemoizerConfig {
        default_expiration: Duration::from_millis(30),
        ..memoizer_config()
    });
    let counter = Counter::default();

    let _ = memoizer.memoize("key1", counter.computation()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    let _ = memoizer.memoize("key2", counter.computation()).await;

    assert_eq!(memoizer.store().sweep(), 1);
    assert_eq!(memoizer.cached_entries(), 1);
    assert!(memoizer.memoize("key2", counter.computation()).await.cached);
}
