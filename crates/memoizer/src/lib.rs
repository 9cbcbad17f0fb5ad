//! An in-process memoization cache with request coalescing.
//!
//! The [`Memoizer`] maps keys to the results of expensive computations. It combines two parts:
//!
//! - An [`ExpiringStore`], which holds finished results for a fixed time-to-live. Expired
//!   entries are never returned, and are purged by a periodic background sweep.
//! - A [`CallCoordinator`], which makes sure that concurrent callers for the same key share a
//!   single computation. The first caller becomes the *leader* and runs the computation, every
//!   other caller arriving in the meantime becomes a *follower* and waits for the leader's
//!   result.
//!
//! Results are type-erased as a [`Value`]. The typed [`Memoizer::call`] facade takes care of
//! erasing and recovering the concrete type, and reports a [`CallError::TypeMismatch`] instead of
//! panicking if the same key was used with two different types.
//!
//! # Example
//!
//! ```
//! # use std::time::Duration;
//! # use memoizer::Memoizer;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let memoizer: Memoizer = Memoizer::new(Duration::from_secs(90), Duration::from_secs(600));
//!
//! let first = memoizer
//!     .call("answer", || async { Ok::<_, std::io::Error>(42u32) })
//!     .await;
//! assert_eq!(first.into_parts().0.unwrap(), 42);
//!
//! let second = memoizer
//!     .call("answer", || async { Ok::<_, std::io::Error>(0u32) })
//!     .await;
//! assert!(second.cached);
//! assert_eq!(second.result.unwrap(), 42);
//! # }
//! ```
//!
//! # Errors
//!
//! Errors of a computation are shared verbatim with all callers that waited for it, see
//! [`ComputationError`]. By default failed computations are not cached, so the next call after
//! a failure runs the computation again. This can be changed with
//! [`MemoizerConfig::cache_errors`].
//!
//! # Metrics
//!
//! Once [`metrics::configure_statsd`] was called, the memoizer reports access, hit, coalescing
//! and computation counters to statsd, tagged with the memoizer's configured name.

use std::fmt::Debug;
use std::hash::Hash;

#[macro_use]
pub mod metrics;

mod config;
mod coordinator;
mod error;
mod memoizer;
mod store;
mod typed;
pub mod utils;
mod value;

pub use config::MemoizerConfig;
pub use coordinator::CallCoordinator;
pub use error::{Abandoned, CallError, ComputationError};
pub use memoizer::{Memoized, Memoizer};
pub use store::ExpiringStore;
pub use value::Value;

/// Keys that memoized results can be stored under.
///
/// This is implemented for every type fulfilling the bounds, such as [`String`], integers or
/// tuples and structs deriving the required traits.
pub trait MemoKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> MemoKey for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// The result of a computation as it is stored and shared.
pub type Outcome = Result<Value, ComputationError>;
