use std::collections::BTreeMap;

use memoizer::{CallError, ComputationError, Memoizer};
use memoizer_test::memoizer_config;

#[tokio::test]
async fn test_typed_call() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());
    let lookup = || async {
        let mut totals = BTreeMap::new();
        totals.insert("a", 1u64);
        totals.insert("b", 2u64);
        Ok::<_, ComputationError>(totals)
    };

    let (result, cached) = memoizer.call("totals", lookup).await.into_parts();
    assert!(!cached);
    assert_eq!(result.unwrap()["b"], 2);

    let (result, cached) = memoizer.call("totals", lookup).await.into_parts();
    assert!(cached);
    assert_eq!(result.unwrap().len(), 2);
}

#[tokio::test]
async fn test_generic_keys() {
    memoizer_test::setup();

    let memoizer = Memoizer::<(u32, bool)>::from_config(&memoizer_config());

    let memoized = memoizer
        .call((1, true), || async { Ok::<_, ComputationError>(vec![1u8, 2, 3]) })
        .await;
    assert_eq!(memoized.result.unwrap(), [1, 2, 3]);

    let memoized = memoizer
        .call((1, false), || async { Ok::<_, ComputationError>(vec![4u8]) })
        .await;
    assert!(!memoized.cached);
    assert_eq!(memoized.result.unwrap(), [4]);
}

#[tokio::test]
async fn test_mixed_types() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());

    let memoized = memoizer
        .call("key1", || async { Ok::<_, ComputationError>(42i64) })
        .await;
    assert_eq!(memoized.result.unwrap(), 42);

    let memoized = memoizer
        .call("key1", || async { Ok::<_, ComputationError>(String::from("42")) })
        .await;
    assert!(memoized.cached);
    let err = memoized.result.unwrap_err();
    assert!(matches!(
        err,
        CallError::TypeMismatch {
            expected: "alloc::string::String",
            found: "i64",
        }
    ));
    assert!(err.as_computation().is_none());

    // the cached value is still intact for the original type
    let memoized = memoizer
        .call("key1", || async { Ok::<_, ComputationError>(0i64) })
        .await;
    assert!(memoized.cached);
    assert_eq!(memoized.result.unwrap(), 42);
}

#[tokio::test]
async fn test_typed_failure() {
    memoizer_test::setup();

    let memoizer: Memoizer = Memoizer::from_config(&memoizer_config());

    let memoized = memoizer
        .call("key1", || async {
            Err::<String, _>(anyhow::anyhow!("Try again"))
        })
        .await;
    assert!(!memoized.cached);
    let err = memoized.result.unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"Try again");

    let memoized = memoizer
        .call("key1", || async { Ok::<_, anyhow::Error>(String::from("ok")) })
        .await;
    assert!(!memoized.cached);
    assert_eq!(memoized.result.unwrap(), "ok");
}
