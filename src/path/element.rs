use std::any::Any;
use std::cell::OnceCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::{LocalBoxFuture, try_join_all};
use indexmap::IndexMap;

use crate::core::{Dynamic, Outcome, Promise, Values};
use crate::error::ResolveError;
use crate::injector::Invocable;
use crate::path::{Path, Resolvable};
use crate::state::{ResolvePolicy, State};

/// The elements from the root down to some element, inclusive. Set once, when
/// the element is first placed in a path, and shared with its resolvables.
pub(crate) type Lineage = Rc<OnceCell<Vec<Weak<PathElement>>>>;

/// Upgrades a lineage back into elements, failing if it was never set or if
/// the path it came from has been dropped.
pub(crate) fn ancestry(lineage: &Lineage, state: &str) -> Result<Vec<Rc<PathElement>>, ResolveError> {
    lineage
        .get()
        .ok_or_else(|| ResolveError::ElementNotFound(state.to_string()))?
        .iter()
        .map(|element| {
            element
                .upgrade()
                .ok_or_else(|| ResolveError::Detached(state.to_string()))
        })
        .collect()
}

/// The resolvables declared by one [`State`], as one step of a [`Path`].
///
/// An element remembers the ancestors it had in the first path it was placed
/// in, and its resolvables always look up dependencies among those. Paths
/// derived later (reversed, concatenated) share the element without changing
/// what it sees.
pub struct PathElement {
    state: Rc<State>,
    resolvables: IndexMap<String, Rc<Resolvable>>,
    lineage: Lineage,
}

impl PathElement {
    /// Creates the element together with a [`Resolvable`] for every
    /// invocable the state declares.
    pub fn new(state: Rc<State>) -> Self {
        let lineage = Lineage::default();
        let resolvables = state
            .invocables()
            .iter()
            .map(|(name, invocable)| {
                let resolvable = Resolvable::with_lineage(
                    name.clone(),
                    invocable.clone(),
                    state.clone(),
                    Rc::clone(&lineage),
                );
                (name.clone(), Rc::new(resolvable))
            })
            .collect();

        Self {
            state,
            resolvables,
            lineage,
        }
    }

    /// Records `ancestry` as the lineage, unless one was recorded before.
    pub(crate) fn adopt(&self, ancestry: &[Rc<PathElement>]) {
        self.lineage
            .get_or_init(|| ancestry.iter().map(Rc::downgrade).collect());
    }

    /// The path from the root through this element, as recorded when the
    /// element was first placed in a path. `path` must contain the element.
    pub(crate) fn scope(&self, path: &Path) -> Result<Path, ResolveError> {
        if path.element(self.name()).is_none() {
            return Err(ResolveError::ElementNotFound(self.name().to_string()));
        }

        let elements = ancestry(&self.lineage, self.name())?;
        Ok(Path::scoped(path.injector(), elements))
    }

    pub fn state(&self) -> &Rc<State> {
        &self.state
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn resolvables(&self) -> &IndexMap<String, Rc<Resolvable>> {
        &self.resolvables
    }

    pub fn resolvable(&self, name: &str) -> Option<&Rc<Resolvable>> {
        self.resolvables.get(name)
    }

    /// Resolves every resolvable whose effective policy is at least `policy`.
    ///
    /// The returned future completes once all of them have settled and fails
    /// with the first failure. Values are read back through the resolvables.
    pub fn resolve(
        &self,
        path: &Path,
        policy: ResolvePolicy,
    ) -> LocalBoxFuture<'static, Result<(), ResolveError>> {
        let pending: Vec<Promise> = self
            .resolvables
            .iter()
            .filter(|(name, _)| self.state.policy_of(name) >= policy)
            .map(|(_, resolvable)| resolvable.get(path))
            .collect();

        tracing::debug!(
            state = self.name(),
            %policy,
            count = pending.len(),
            "resolving path element"
        );

        async move { try_join_all(pending).await.map(|_| ()) }.boxed_local()
    }

    /// Resolves the dependencies of `invocable` visible from this element,
    /// then invokes it through [`invoke_now`](Self::invoke_now).
    ///
    /// If any dependency fails the invocable is never called.
    pub fn invoke_later(
        &self,
        invocable: &Invocable,
        locals: Values,
        path: &Path,
    ) -> LocalBoxFuture<'static, Result<Dynamic, ResolveError>> {
        let scope = match self.scope(path) {
            Ok(scope) => scope,
            Err(err) => return futures::future::ready(Err(err)).boxed_local(),
        };

        let pending: Vec<Promise> = scope
            .resolvables_for(invocable)
            .values()
            .map(|resolvable| resolvable.get(&scope))
            .collect();

        let invocable = invocable.clone();
        let state = Rc::clone(&self.state);

        async move {
            try_join_all(pending).await?;

            invoke_in(&scope, &state, &invocable, &locals)?
                .settle()
                .await
                .map_err(|err| ResolveError::invocation(state.name(), err))
        }
        .boxed_local()
    }

    /// Invokes `invocable` right away with whatever is already resolved.
    ///
    /// Values in scope are the settled resolvables from the root up to this
    /// element whose names `invocable` declares. `locals` win over them.
    pub fn invoke_now(
        &self,
        invocable: &Invocable,
        locals: &Values,
        path: &Path,
    ) -> Result<Outcome, ResolveError> {
        let scope = self.scope(path)?;
        invoke_in(&scope, &self.state, invocable, locals)
    }
}

fn invoke_in(
    scope: &Path,
    state: &State,
    invocable: &Invocable,
    locals: &Values,
) -> Result<Outcome, ResolveError> {
    let mut values = locals.clone();

    for (name, resolvable) in scope.resolvables_for(invocable) {
        if let Some(value) = resolvable.value()
            && !values.contains(&name)
        {
            values.insert_dynamic(name, value.clone());
        }
    }

    let context: &dyn Any = state;
    scope
        .injector()
        .invoke(invocable, Some(context), &values)
        .map_err(|err| ResolveError::invocation(state.name(), err))
}

impl Debug for PathElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathElement")
            .field("state", &self.state.name())
            .field("resolvables", &self.resolvables.keys().collect::<Vec<_>>())
            .finish()
    }
}
