//! The seam between the resolution engines and the code they run.
//!
//! An [`Invocable`] declares the names it depends on up front, next to the
//! callable itself. Nothing is inferred from argument lists: whatever names the
//! invocable lists are looked up, and only those are handed to it through a
//! [`Call`].
//!
//! How an invocable is actually called is up to an [`Injector`]. The engines
//! never hold one in global state, it is passed to [`Path`](crate::Path) and
//! [`Resolver`](crate::Resolver) when they are created.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::Arc;

use crate::core::{Dynamic, Outcome, Values};
use crate::error::ResolveError;

type Callback = dyn Fn(&Call<'_>) -> anyhow::Result<Outcome>;

#[derive(Clone)]
enum Kind {
    Function {
        dependencies: Rc<[String]>,
        callback: Rc<Callback>,
    },
    Service(String),
}

/// A unit of work which can be resolved by name.
///
/// Either a function with an explicit list of dependency names, or a
/// reference to a named service which the [`Injector`] knows how to fetch.
#[derive(Clone)]
pub struct Invocable {
    kind: Kind,
}

impl Invocable {
    /// Creates an invocable which receives the values named in `dependencies`.
    ///
    /// ```rust
    /// use keiro::{Invocable, Outcome};
    ///
    /// let full = Invocable::new(["greeting"], |call| {
    ///     let greeting = call.get::<String>("greeting")?;
    ///     Ok(Outcome::ready(format!("{greeting} there")))
    /// });
    ///
    /// assert_eq!(full.dependencies(), ["greeting".to_string()]);
    /// ```
    pub fn new<I, S, F>(dependencies: I, callback: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Call<'_>) -> anyhow::Result<Outcome> + 'static,
    {
        Self {
            kind: Kind::Function {
                dependencies: dependencies.into_iter().map(Into::into).collect(),
                callback: Rc::new(callback),
            },
        }
    }

    /// Creates an invocable without dependencies which always yields `value`.
    pub fn value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        let value: Dynamic = Arc::new(value);
        Self::new(Vec::<String>::new(), move |_| {
            Ok(Outcome::Ready(value.clone()))
        })
    }

    /// Creates an invocable which fetches the service registered as `name`.
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Service(name.into()),
        }
    }

    /// The declared dependency names, in declaration order. Services have none.
    pub fn dependencies(&self) -> &[String] {
        match &self.kind {
            Kind::Function { dependencies, .. } => &**dependencies,
            Kind::Service(_) => &[],
        }
    }

    /// Runs the callable with the prepared arguments.
    ///
    /// Service invocables have nothing to run, they are fetched through
    /// [`Injector::service`] instead and fail here with
    /// [`ResolveError::NotCallable`].
    pub fn call(&self, call: &Call<'_>) -> anyhow::Result<Outcome> {
        match &self.kind {
            Kind::Function { callback, .. } => (**callback)(call),
            Kind::Service(name) => Err(ResolveError::NotCallable(name.clone()).into()),
        }
    }

    /// The service name, if this invocable refers to one.
    pub fn service_name(&self) -> Option<&str> {
        match &self.kind {
            Kind::Function { .. } => None,
            Kind::Service(name) => Some(name.as_str()),
        }
    }
}

impl Debug for Invocable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Function { dependencies, .. } => f
                .debug_struct("Invocable")
                .field("dependencies", dependencies)
                .finish_non_exhaustive(),
            Kind::Service(name) => f.debug_tuple("Invocable::service").field(name).finish(),
        }
    }
}

/// The arguments of a single invocation.
///
/// Holds the values picked for the invocable's dependencies and the context
/// it is invoked with: the declaring [`State`](crate::State) inside a
/// [`Path`](crate::Path), or whatever the caller supplied to the
/// [`Resolver`](crate::Resolver).
pub struct Call<'a> {
    values: Values,
    context: Option<&'a dyn Any>,
}

impl<'a> Call<'a> {
    pub fn new(values: Values, context: Option<&'a dyn Any>) -> Self {
        Self { values, context }
    }

    /// Retrieves the dependency `name`, downcast to `T`.
    pub fn get<T>(&self, name: &str) -> Result<&T, ResolveError>
    where
        T: 'static,
    {
        self.values.get(name)
    }

    /// Retrieves the dependency `name` without downcasting it.
    pub fn get_dynamic(&self, name: &str) -> Option<&Dynamic> {
        self.values.get_dynamic(name)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// The invocation context downcast to `C`, if there is one of that type.
    pub fn context<C>(&self) -> Option<&'a C>
    where
        C: 'static,
    {
        self.context.and_then(|context| context.downcast_ref::<C>())
    }
}

/// The capability set both engines are built with.
pub trait Injector {
    /// Fetches a named service.
    fn service(&self, name: &str) -> Result<Dynamic, ResolveError>;

    /// The names `invocable` depends on.
    fn dependencies<'i>(&self, invocable: &'i Invocable) -> &'i [String] {
        invocable.dependencies()
    }

    /// Invokes `invocable` with the matching entries of `locals`.
    ///
    /// Only declared dependencies are handed over. Errors raised by the
    /// invocable are returned to the caller as they are.
    fn invoke(
        &self,
        invocable: &Invocable,
        context: Option<&dyn Any>,
        locals: &Values,
    ) -> anyhow::Result<Outcome> {
        if let Some(name) = invocable.service_name() {
            return Ok(Outcome::Ready(self.service(name)?));
        }

        let mut values = Values::new();
        for name in self.dependencies(invocable) {
            if let Some(value) = locals.get_dynamic(name) {
                values.insert_dynamic(name.clone(), value.clone());
            } else if let Ok(value) = self.service(name) {
                values.insert_dynamic(name.clone(), value);
            }
        }

        invocable.call(&Call::new(values, context))
    }
}

/// The default [`Injector`], backed by a registry of named services.
///
/// A dependency which is not found among the resolved values falls back to a
/// service of the same name.
#[derive(Default)]
pub struct Services {
    services: HashMap<String, Dynamic>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`.
    pub fn register<T>(mut self, name: impl Into<String>, service: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    pub fn into_rc(self) -> Rc<dyn Injector> {
        Rc::new(self)
    }
}

impl Injector for Services {
    fn service(&self, name: &str) -> Result<Dynamic, ResolveError> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::ServiceNotFound(name.to_string()))
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        f.debug_struct("Services")
            .field("services", &names)
            .finish()
    }
}
