//! Resolution of a flat mapping of invocables, optionally on top of a parent
//! resolution.
//!
//! A mapping is first studied into a [`Plan`], an ordering in which every
//! invocable comes after the invocables it depends on. Cycles are reported at
//! this point, synchronously. A plan can then be executed any number of times,
//! each execution producing a [`Resolution`].
//!
//! ## Precedence
//!
//! When an execution settles, its values are merged from three sources, the
//! first one winning:
//!
//! 1. `locals` given by the caller,
//! 2. the results of the plan's own invocables,
//! 3. values inherited from the parent resolution.
//!
//! ## Decorating inherited values
//!
//! An invocable which depends on its own name receives the parent's value of
//! that name. Every other invocable of the same resolution which depends on
//! that name sees the decorated value instead.
//!
//! ```rust
//! use indexmap::IndexMap;
//! use keiro::{Invocable, Outcome, Resolver, Services, Values};
//!
//! let resolver = Resolver::new(Services::new().into_rc());
//!
//! let mut base = IndexMap::new();
//! base.insert("x".to_string(), Invocable::value(1_i32));
//!
//! let mut decorated = IndexMap::new();
//! decorated.insert(
//!     "x".to_string(),
//!     Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")? + 1))),
//! );
//!
//! let parent = resolver.resolve(&base, Values::new(), None, None).unwrap();
//! let child = resolver.resolve(&decorated, Values::new(), Some(&parent), None).unwrap();
//!
//! let values = futures::executor::block_on(child).unwrap();
//! assert_eq!(*values.get::<i32>("x").unwrap(), 2);
//! ```

mod plan;
mod resolution;

use std::rc::Rc;

use indexmap::IndexMap;

pub use crate::resolver::plan::{Plan, PlanEntry};
pub use crate::resolver::resolution::Resolution;

use crate::core::{Dynamic, Values};
use crate::error::ResolveError;
use crate::injector::{Injector, Invocable};

/// Studies and executes mappings of invocables with a given [`Injector`].
#[derive(Clone)]
pub struct Resolver {
    injector: Rc<dyn Injector>,
}

impl Resolver {
    pub fn new(injector: Rc<dyn Injector>) -> Self {
        Self { injector }
    }

    /// Compiles `invocables` into a reusable [`Plan`].
    ///
    /// Fails with [`ResolveError::Cycle`] if the invocables depend on each
    /// other in a cycle.
    pub fn study(&self, invocables: &IndexMap<String, Invocable>) -> Result<Plan, ResolveError> {
        plan::study(Rc::clone(&self.injector), invocables).map_err(|err| {
            tracing::debug!("cyclic dependency: {err}");
            ResolveError::from(err)
        })
    }

    /// Studies `invocables` and executes the plan right away.
    ///
    /// See [`Plan::resolve`] for the meaning of the arguments.
    pub fn resolve(
        &self,
        invocables: &IndexMap<String, Invocable>,
        locals: Values,
        parent: Option<&Resolution>,
        context: Option<Dynamic>,
    ) -> Result<Resolution, ResolveError> {
        Ok(self.study(invocables)?.resolve(locals, parent, context))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}
