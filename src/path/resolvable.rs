use std::any::Any;
use std::cell::OnceCell;
use std::fmt::Debug;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::try_join_all;

use crate::core::{Dynamic, Promise, Values};
use crate::error::ResolveError;
use crate::injector::{Injector, Invocable};
use crate::path::element::{Lineage, ancestry};
use crate::path::Path;
use crate::state::State;

/// A single named invocable together with its memoized result.
///
/// The result is created on the first [`get`](Self::get) and every later
/// request receives the very same pending result, so the invocable runs at
/// most once for as long as the resolvable lives. Failures are not retried.
pub struct Resolvable {
    name: String,
    invocable: Invocable,
    state: Rc<State>,
    lineage: Lineage,
    promise: OnceCell<Promise>,
    value: Rc<OnceCell<Dynamic>>,
}

impl Resolvable {
    /// Creates a resolvable outside of any element. Its scope is taken from
    /// the first path it is requested through.
    pub fn new(name: impl Into<String>, invocable: Invocable, state: Rc<State>) -> Self {
        Self::with_lineage(name, invocable, state, Lineage::default())
    }

    pub(crate) fn with_lineage(
        name: impl Into<String>,
        invocable: Invocable,
        state: Rc<State>,
        lineage: Lineage,
    ) -> Self {
        Self {
            name: name.into(),
            invocable,
            state,
            lineage,
            promise: OnceCell::new(),
            value: Rc::new(OnceCell::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Rc<State> {
        &self.state
    }

    pub fn invocable(&self) -> &Invocable {
        &self.invocable
    }

    /// The unwrapped value, once the result has settled successfully.
    pub fn value(&self) -> Option<&Dynamic> {
        self.value.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    /// Returns the pending result, creating it on the first call.
    ///
    /// Dependencies are looked up among the ancestors of the declaring
    /// element. `path` only supplies the injector, and the ancestors for a
    /// resolvable which does not belong to any element yet.
    pub fn get(&self, path: &Path) -> Promise {
        self.promise
            .get_or_init(|| {
                if self.lineage.get().is_none()
                    && let Ok(scope) = path.path_from_state(self.state.name())
                {
                    self.lineage
                        .get_or_init(|| scope.elements().iter().map(Rc::downgrade).collect());
                }

                self.resolve(path.injector())
            })
            .clone()
    }

    /// Builds the pending result of this resolvable.
    ///
    /// Everything visible from the declaring element is in scope except for
    /// this resolvable itself. An ancestor's resolvable of the same name stays
    /// visible, which lets a state decorate an inherited value.
    fn resolve(&self, injector: Rc<dyn Injector>) -> Promise {
        let name = self.name.clone();
        let invocable = self.invocable.clone();
        let state = Rc::clone(&self.state);
        let lineage = Rc::clone(&self.lineage);
        let slot = Rc::clone(&self.value);

        async move {
            let pending = dependencies(&lineage, &state, &name, &invocable, &injector)?
                .into_iter()
                .map(|(dependency, promise)| {
                    promise.map(move |result| result.map(|value| (dependency, value)))
                });

            let locals: Values = try_join_all(pending).await?.into_iter().collect();

            tracing::debug!(state = state.name(), resolvable = %name, "invoking resolvable");

            let context: &dyn Any = &*state;
            let value = match injector.invoke(&invocable, Some(context), &locals) {
                Ok(outcome) => outcome.settle().await,
                Err(err) => Err(err),
            }
            .map_err(|err| {
                tracing::debug!(state = state.name(), resolvable = %name, "resolvable failed: {err}");
                ResolveError::invocation(name.as_str(), err)
            })?;

            Ok::<_, ResolveError>(slot.get_or_init(|| value).clone())
        }
        .boxed_local()
        .shared()
    }
}

/// Requests the results of every declared dependency in scope.
///
/// The ancestors are only held for the duration of this call, pending results
/// keep nothing but weak references to the elements.
fn dependencies(
    lineage: &Lineage,
    state: &State,
    name: &str,
    invocable: &Invocable,
    injector: &Rc<dyn Injector>,
) -> Result<Vec<(String, Promise)>, ResolveError> {
    let scope = Path::scoped(Rc::clone(injector), ancestry(lineage, state.name())?);
    let visible = scope.resolvables(&[name]);

    let promises = injector
        .dependencies(invocable)
        .iter()
        .filter_map(|dependency| {
            let resolvable = visible.get(dependency)?;
            Some((dependency.clone(), resolvable.get(&scope)))
        })
        .collect();

    Ok(promises)
}

impl Debug for Resolvable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvable")
            .field("name", &self.name)
            .field("state", &self.state.name())
            .field("invocable", &self.invocable)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
