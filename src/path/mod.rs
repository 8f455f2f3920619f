//! Resolution along a hierarchy of declaring positions.
//!
//! A [`Path`] is an ordered list of [`PathElement`]s, from the root state down
//! to some target state. Each element owns the [`Resolvable`]s declared by its
//! state. A resolvable's dependencies are looked up by name among everything
//! visible from its own element:
//!
//! * resolvables of the element itself (except the resolvable being resolved),
//! * resolvables of every ancestor element,
//!
//! where a descendant's resolvable hides an ancestor's one of the same name.
//!
//! ## Sharing
//!
//! Paths are cheap to clone. Deriving a path (`slice`, `path_from_root`,
//! `concat`, `reverse`) never copies elements, the derived path points at the
//! very same elements, so whatever has been resolved through one path is seen
//! by all of them.
//!
//! An element keeps the ancestry of the first path it was placed in. Its
//! resolvables look up dependencies there, whichever derived path asked for
//! them, and hold the ancestors only weakly.

mod element;
mod resolvable;

use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::rc::Rc;

use futures::FutureExt;
use futures::future::{LocalBoxFuture, try_join_all};
use indexmap::IndexMap;

pub use crate::path::element::PathElement;
pub use crate::path::resolvable::Resolvable;

use crate::error::ResolveError;
use crate::injector::{Injector, Invocable};
use crate::state::{ResolvePolicy, State};

/// An ordered sequence of path elements, root first.
#[derive(Clone)]
pub struct Path {
    injector: Rc<dyn Injector>,
    elements: Vec<Rc<PathElement>>,
}

impl Path {
    /// Creates a path with a fresh element for every state.
    ///
    /// ```rust
    /// use keiro::{Invocable, Path, Services, State};
    ///
    /// let root = State::new("root").resolve("answer", Invocable::value(42_u32));
    /// let child = State::new("child");
    ///
    /// let path = Path::new(Services::new().into_rc(), [root.into_rc(), child.into_rc()]).unwrap();
    /// assert_eq!(path.to_string(), "root.child");
    /// ```
    pub fn new<I>(injector: Rc<dyn Injector>, states: I) -> Result<Self, ResolveError>
    where
        I: IntoIterator<Item = Rc<State>>,
    {
        let elements = states
            .into_iter()
            .map(|state| Rc::new(PathElement::new(state)));

        Self::from_elements(injector, elements)
    }

    /// Creates a path out of already existing elements, sharing them.
    pub fn from_elements<I>(injector: Rc<dyn Injector>, elements: I) -> Result<Self, ResolveError>
    where
        I: IntoIterator<Item = Rc<PathElement>>,
    {
        let elements: Vec<_> = elements.into_iter().collect();

        let mut seen = HashSet::new();
        for element in &elements {
            if !seen.insert(element.name()) {
                return Err(ResolveError::DuplicateState(element.name().to_string()));
            }
        }

        for (index, element) in elements.iter().enumerate() {
            element.adopt(&elements[..=index]);
        }

        Ok(Self { injector, elements })
    }

    /// A path over `elements` as they are, without recording any lineage.
    pub(crate) fn scoped(injector: Rc<dyn Injector>, elements: Vec<Rc<PathElement>>) -> Self {
        Self { injector, elements }
    }

    pub fn injector(&self) -> Rc<dyn Injector> {
        Rc::clone(&self.injector)
    }

    pub fn elements(&self) -> &[Rc<PathElement>] {
        &self.elements
    }

    pub fn element(&self, state: &str) -> Option<&Rc<PathElement>> {
        self.elements.iter().find(|element| element.name() == state)
    }

    pub fn last(&self) -> Option<&Rc<PathElement>> {
        self.elements.last()
    }

    pub fn states(&self) -> impl Iterator<Item = &Rc<State>> {
        self.elements.iter().map(|element| element.state())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Every resolvable in the path by name, root to leaf, a later element
    /// overriding an earlier one.
    ///
    /// Names in `omit_own` are skipped only for the last element, so an
    /// ancestor's resolvable of the same name shows through.
    pub fn resolvables(&self, omit_own: &[&str]) -> IndexMap<String, Rc<Resolvable>> {
        let last = self.elements.len().saturating_sub(1);
        let mut map = IndexMap::new();

        for (index, element) in self.elements.iter().enumerate() {
            for (name, resolvable) in element.resolvables() {
                if index == last && omit_own.contains(&name.as_str()) {
                    continue;
                }
                map.insert(name.clone(), Rc::clone(resolvable));
            }
        }

        map
    }

    /// The visible resolvables `invocable` depends on.
    pub fn resolvables_for(&self, invocable: &Invocable) -> IndexMap<String, Rc<Resolvable>> {
        let mut all = self.resolvables(&[]);
        self.injector
            .dependencies(invocable)
            .iter()
            .filter_map(|name| all.swap_remove_entry(name))
            .collect()
    }

    /// Resolves every element whose resolvables have an effective policy of
    /// at least `policy`.
    ///
    /// Elements are started root first. The returned future completes once
    /// everything has settled, and fails as soon as anything fails.
    pub fn resolve(&self, policy: ResolvePolicy) -> LocalBoxFuture<'static, Result<(), ResolveError>> {
        tracing::debug!(path = %self, %policy, "resolving path");

        let pending: Vec<_> = self
            .elements
            .iter()
            .map(|element| element.resolve(self, policy))
            .collect();

        async move { try_join_all(pending).await.map(|_| ()) }.boxed_local()
    }

    /// The sub-path from the root through `element`, inclusive.
    pub fn path_from_root(&self, element: &PathElement) -> Result<Path, ResolveError> {
        self.path_from_state(element.name())
    }

    /// The sub-path from the root through the element of `state`, inclusive.
    pub fn path_from_state(&self, state: &str) -> Result<Path, ResolveError> {
        let index = self
            .elements
            .iter()
            .position(|element| element.name() == state)
            .ok_or_else(|| ResolveError::ElementNotFound(state.to_string()))?;

        Ok(self.slice(0, index + 1))
    }

    /// The elements in `start..end`, clamped to the length of the path.
    pub fn slice(&self, start: usize, end: usize) -> Path {
        let end = end.min(self.elements.len());
        let start = start.min(end);

        Path {
            injector: Rc::clone(&self.injector),
            elements: self.elements[start..end].to_vec(),
        }
    }

    /// This path followed by `other`.
    pub fn concat(&self, other: &Path) -> Result<Path, ResolveError> {
        let elements = self.elements.iter().chain(&other.elements).cloned();
        Path::from_elements(Rc::clone(&self.injector), elements)
    }

    /// A new path with the elements in reverse order. `self` is left as is.
    pub fn reverse(&self) -> Path {
        Path {
            injector: Rc::clone(&self.injector),
            elements: self.elements.iter().rev().cloned().collect(),
        }
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, element) in self.elements.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(element.name())?;
        }
        Ok(())
    }
}

impl Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Path").field(&self.elements).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::FutureExt;

    use super::*;
    use crate::core::{Outcome, Values};
    use crate::injector::Services;

    fn build(states: Vec<State>) -> Path {
        Path::new(
            Services::new().into_rc(),
            states.into_iter().map(State::into_rc),
        )
        .unwrap()
    }

    fn int(value: &crate::core::Dynamic) -> i32 {
        *value.downcast_ref::<i32>().unwrap()
    }

    #[tokio::test]
    async fn test_greeting_end_to_end() {
        let path = build(vec![
            State::new("root").resolve(
                "greeting",
                Invocable::new(Vec::<String>::new(), |_| Ok(Outcome::ready(String::from("hi")))),
            ),
            State::new("child").resolve(
                "full",
                Invocable::new(["greeting"], |call| {
                    let greeting = call.get::<String>("greeting")?;
                    Ok(Outcome::ready(format!("{greeting} there")))
                }),
            ),
        ]);

        path.resolve(ResolvePolicy::Jit).await.unwrap();

        let child = path.element("child").unwrap();
        let read = Invocable::new(["full"], |call| {
            Ok(Outcome::ready(call.get::<String>("full")?.clone()))
        });
        let value = child.invoke_later(&read, Values::new(), &path).await.unwrap();

        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("hi there"));
    }

    #[tokio::test]
    async fn test_descendant_decorates_ancestor() {
        let path = build(vec![
            State::new("root").resolve("x", Invocable::value(1_i32)),
            State::new("child")
                .resolve(
                    "x",
                    Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")? * 10))),
                )
                .resolve(
                    "y",
                    Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")? + 1))),
                ),
        ]);

        path.resolve(ResolvePolicy::Jit).await.unwrap();

        let root = path.element("root").unwrap();
        let child = path.element("child").unwrap();

        assert_eq!(int(root.resolvable("x").unwrap().value().unwrap()), 1);
        assert_eq!(int(child.resolvable("x").unwrap().value().unwrap()), 10);
        assert_eq!(int(child.resolvable("y").unwrap().value().unwrap()), 11);
    }

    #[test]
    fn test_resolvables_shadowing() {
        let path = build(vec![
            State::new("root")
                .resolve("a", Invocable::value(1_i32))
                .resolve("b", Invocable::value(2_i32)),
            State::new("child").resolve("a", Invocable::value(3_i32)),
        ]);

        let all = path.resolvables(&[]);
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"].state().name(), "child");
        assert_eq!(all["b"].state().name(), "root");

        let omitted = path.resolvables(&["a", "b"]);
        assert_eq!(omitted["a"].state().name(), "root");
        assert_eq!(omitted["b"].state().name(), "root");
    }

    #[test]
    fn test_resolvables_for() {
        let path = build(vec![
            State::new("root")
                .resolve("a", Invocable::value(1_i32))
                .resolve("b", Invocable::value(2_i32)),
        ]);

        let picked = path.resolvables_for(&Invocable::new(["b", "missing"], |_| {
            Ok(Outcome::ready(()))
        }));

        assert_eq!(picked.keys().collect::<Vec<_>>(), ["b"]);
    }

    #[tokio::test]
    async fn test_resolve_fails_with_cause() {
        let called = Rc::new(Cell::new(false));
        let b = {
            let called = called.clone();
            Invocable::new(["a"], move |_| {
                called.set(true);
                Ok(Outcome::ready(()))
            })
        };

        let path = build(vec![
            State::new("root").resolve(
                "a",
                Invocable::new(Vec::<String>::new(), |_| anyhow::bail!("a is broken")),
            ),
            State::new("child").resolve("b", b),
        ]);

        let err = path.resolve(ResolvePolicy::Jit).await.unwrap_err();

        match err {
            ResolveError::Invocation { name, cause } => {
                assert_eq!(name, "a");
                assert_eq!(cause.to_string(), "a is broken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!called.get());
    }

    #[tokio::test]
    async fn test_pending_outcomes_interleave() {
        let path = build(vec![
            State::new("root").resolve(
                "slow",
                Invocable::new(Vec::<String>::new(), |_| {
                    Ok(Outcome::pending(async {
                        tokio::task::yield_now().await;
                        Ok(2_i32)
                    }))
                }),
            ),
            State::new("child").resolve(
                "double",
                Invocable::new(["slow"], |call| Ok(Outcome::ready(*call.get::<i32>("slow")? * 2))),
            ),
        ]);

        let pending = path.resolve(ResolvePolicy::Jit);
        path.resolve(ResolvePolicy::Jit).await.unwrap();
        pending.await.unwrap();

        let child = path.element("child").unwrap();
        assert_eq!(int(child.resolvable("double").unwrap().value().unwrap()), 4);
    }

    #[test]
    fn test_missing_dependency_is_undefined() {
        let path = build(vec![State::new("root").resolve(
            "lonely",
            Invocable::new(["nobody"], |call| Ok(Outcome::ready(*call.get::<i32>("nobody")?))),
        )]);

        let err = path
            .resolve(ResolvePolicy::Jit)
            .now_or_never()
            .expect("nothing here is pending")
            .unwrap_err();

        assert!(err.to_string().contains("'nobody' is undefined"), "unexpected error: {err}");
    }

    #[test]
    fn test_path_from_root() {
        let path = build(vec![State::new("a"), State::new("b"), State::new("c")]);

        let sub = path.path_from_root(path.element("b").unwrap()).unwrap();
        assert_eq!(sub.to_string(), "a.b");
        assert!(Rc::ptr_eq(&sub.elements()[1], &path.elements()[1]));

        let stranger = PathElement::new(State::new("z").into_rc());
        assert!(matches!(
            path.path_from_root(&stranger),
            Err(ResolveError::ElementNotFound(name)) if name == "z"
        ));
    }

    #[test]
    fn test_slice_clamps() {
        let path = build(vec![State::new("a"), State::new("b"), State::new("c")]);

        assert_eq!(path.slice(1, 3).to_string(), "b.c");
        assert_eq!(path.slice(1, 10).to_string(), "b.c");
        assert!(path.slice(5, 10).is_empty());
    }

    #[test]
    fn test_concat_and_duplicates() {
        let ab = build(vec![State::new("a"), State::new("b")]);
        let c = build(vec![State::new("c")]);

        assert_eq!(ab.concat(&c).unwrap().to_string(), "a.b.c");
        assert!(matches!(
            ab.concat(&ab.slice(1, 2)),
            Err(ResolveError::DuplicateState(name)) if name == "b"
        ));

        let result = Path::new(
            Services::new().into_rc(),
            [State::new("a").into_rc(), State::new("a").into_rc()],
        );
        assert!(matches!(result, Err(ResolveError::DuplicateState(_))));
    }

    #[test]
    fn test_reverse_leaves_original() {
        let path = build(vec![State::new("a"), State::new("b"), State::new("c")]);
        let reversed = path.reverse();

        assert_eq!(reversed.to_string(), "c.b.a");
        assert_eq!(path.to_string(), "a.b.c");
        assert!(Rc::ptr_eq(&reversed.elements()[0], &path.elements()[2]));
    }

    #[tokio::test]
    async fn test_reversed_path_keeps_ancestry() {
        let path = build(vec![
            State::new("root").resolve("x", Invocable::value(1_i32)),
            State::new("child").resolve(
                "y",
                Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")? + 1))),
            ),
        ]);

        path.reverse().resolve(ResolvePolicy::Jit).await.unwrap();
        path.resolve(ResolvePolicy::Jit).await.unwrap();

        let child = path.element("child").unwrap();
        assert_eq!(int(child.resolvable("y").unwrap().value().unwrap()), 2);

        let read = Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")?)));
        let value = child
            .invoke_later(&read, Values::new(), &path.reverse())
            .await
            .unwrap();
        assert_eq!(int(&value), 1);
    }

    #[test]
    fn test_dropped_path_frees_elements() {
        let path = build(vec![
            State::new("root").resolve("x", Invocable::value(1_i32)),
            State::new("child").resolve(
                "y",
                Invocable::new(["x"], |call| Ok(Outcome::ready(*call.get::<i32>("x")? + 1))),
            ),
        ]);

        let root = Rc::downgrade(path.element("root").unwrap());
        let child = Rc::downgrade(path.element("child").unwrap());

        drop(path.resolve(ResolvePolicy::Jit));
        drop(path);

        assert!(root.upgrade().is_none());
        assert!(child.upgrade().is_none());
    }

    #[test]
    fn test_result_outliving_its_path() {
        let path = build(vec![State::new("root").resolve("x", Invocable::value(1_i32))]);
        let pending = path.element("root").unwrap().resolvable("x").unwrap().get(&path);

        drop(path);

        let err = pending.now_or_never().unwrap().unwrap_err();
        assert!(matches!(err, ResolveError::Detached(name) if name == "root"));
    }

    #[tokio::test]
    async fn test_derived_paths_share_results() {
        let count = Rc::new(Cell::new(0));
        let counted = {
            let count = count.clone();
            Invocable::new(Vec::<String>::new(), move |_| {
                count.set(count.get() + 1);
                Ok(Outcome::ready(1_i32))
            })
        };

        let path = build(vec![State::new("a").resolve("x", counted), State::new("b")]);
        let sub = path.slice(0, 1);

        sub.resolve(ResolvePolicy::Jit).await.unwrap();
        path.resolve(ResolvePolicy::Jit).await.unwrap();

        assert_eq!(count.get(), 1);
        assert!(path.element("a").unwrap().resolvable("x").unwrap().is_resolved());
    }
}
