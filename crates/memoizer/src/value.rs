use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

/// A type-erased, cheaply clonable memoized value.
///
/// The [`Memoizer`](crate::Memoizer) core stores values without knowing their type. Typed access
/// goes through the checked [`downcast_ref`](Self::downcast_ref) family, which never panics on a
/// type mismatch.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Erases the type of `value`.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// The name of the type this value was created from.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the erased value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Returns a reference to the value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// Returns a shared handle to the value if it is a `T`.
    pub fn downcast_arc<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Arc::clone(&self.inner).downcast().ok()
    }

    /// Returns a clone of the value if it is a `T`, or the name of the actual type otherwise.
    pub fn downcast<T>(&self) -> Result<T, &'static str>
    where
        T: Any + Clone,
    {
        self.downcast_ref::<T>().cloned().ok_or(self.type_name)
    }

    /// Returns `true` if both values share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}
