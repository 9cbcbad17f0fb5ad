use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The error produced by a memoized computation.
///
/// This wraps whatever error the computation returned and is cheap to clone, so the exact same
/// error can be handed to the leader and every follower of a computation. It is never
/// translated: [`Display`](fmt::Display), [`source`](std::error::Error::source) and
/// [`downcast_ref`](Self::downcast_ref) all see the original error.
#[derive(Clone)]
pub struct ComputationError(Arc<anyhow::Error>);

impl ComputationError {
    /// Wraps any error returned by a computation.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self(Arc::new(error.into()))
    }

    /// Creates an error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Attempts to downcast to the concrete error type the computation returned.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref()
    }

    /// Returns `true` if the leader of the computation went away without a result.
    pub fn is_abandoned(&self) -> bool {
        self.downcast_ref::<Abandoned>().is_some()
    }

    /// Returns `true` if both errors originate from the very same computation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for ComputationError {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl fmt::Debug for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for ComputationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// The leader of an in-flight computation terminated without publishing a result.
///
/// This happens when the computation panics. Every caller of that round observes this error
/// wrapped in a [`ComputationError`], and the key is free to be computed again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("computation was abandoned before producing a result")]
pub struct Abandoned;

/// An error returned by the typed [`Memoizer::call`](crate::Memoizer::call) facade.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The computation itself failed.
    #[error(transparent)]
    Computation(#[from] ComputationError),
    /// The value cached for this key has a different type than the one requested.
    ///
    /// This happens when the same key is used with computations of different result types.
    #[error("type mismatch for memoized value: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// The type that was requested.
        expected: &'static str,
        /// The type of the value that is stored for the key.
        found: &'static str,
    },
}

impl CallError {
    /// Returns the underlying computation error, if this is one.
    pub fn as_computation(&self) -> Option<&ComputationError> {
        match self {
            Self::Computation(err) => Some(err),
            Self::TypeMismatch { .. } => None,
        }
    }
}
