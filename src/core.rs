use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};

use crate::error::ResolveError;

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A pending result which settles exactly once and can be awaited by any
/// number of dependents.
pub type Promise = Shared<LocalBoxFuture<'static, Result<Dynamic, ResolveError>>>;

/// Wraps any value into a [`Dynamic`].
pub fn dynamic<T>(value: T) -> Dynamic
where
    T: Send + Sync + 'static,
{
    Arc::new(value)
}

/// A mapping from names to resolved values.
///
/// This is the shape of everything passed around by name: locals supplied by
/// the caller, the arguments handed to an invocable, and the merged result of
/// a resolution.
#[derive(Clone, Default)]
pub struct Values {
    map: HashMap<String, Dynamic>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, replacing any previous value.
    pub fn insert<T>(&mut self, name: impl Into<String>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(value));
        self
    }

    /// Stores an already type-erased value under `name`.
    pub fn insert_dynamic(&mut self, name: impl Into<String>, value: Dynamic) -> &mut Self {
        self.map.insert(name.into(), value);
        self
    }

    /// Builder flavour of [`insert`](Self::insert).
    pub fn with<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert(name, value);
        self
    }

    /// Retrieves the value under `name` and downcasts it to `T`.
    pub fn get<T>(&self, name: &str) -> Result<&T, ResolveError>
    where
        T: 'static,
    {
        let value = self
            .map
            .get(name)
            .ok_or_else(|| ResolveError::Undefined(name.to_string()))?;

        value
            .downcast_ref::<T>()
            .ok_or_else(|| ResolveError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Retrieves the type-erased value under `name`.
    pub fn get_dynamic(&self, name: &str) -> Option<&Dynamic> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.map.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Copies every entry of `other` whose name is not yet present. Existing
    /// entries always win.
    pub fn merge_missing(&mut self, other: &Values) {
        for (name, value) in &other.map {
            if !self.map.contains_key(name) {
                self.map.insert(name.clone(), value.clone());
            }
        }
    }

    /// Returns a copy without the given names.
    pub fn omit<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Values {
        let mut copy = self.clone();
        for name in names {
            copy.map.remove(name);
        }
        copy
    }
}

impl Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.map.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

impl FromIterator<(String, Dynamic)> for Values {
    fn from_iter<I: IntoIterator<Item = (String, Dynamic)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// What an invocable hands back: either the value itself, or a value which
/// is still being computed.
pub enum Outcome {
    Ready(Dynamic),
    Pending(LocalBoxFuture<'static, anyhow::Result<Dynamic>>),
}

impl Outcome {
    pub fn ready<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Outcome::Ready(Arc::new(value))
    }

    pub fn pending<F, T>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
        T: Send + Sync + 'static,
    {
        Outcome::Pending(future.map(|res| res.map(dynamic)).boxed_local())
    }

    /// Waits for the value, unwrapping a pending outcome.
    pub async fn settle(self) -> anyhow::Result<Dynamic> {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending(future) => future.await,
        }
    }
}

impl Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ready(_) => f.write_str("Outcome::Ready(..)"),
            Outcome::Pending(_) => f.write_str("Outcome::Pending(..)"),
        }
    }
}
