use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared, try_join_all};

use crate::core::{Dynamic, Promise, Values};
use crate::error::ResolveError;
use crate::injector::Injector;
use crate::resolver::{Plan, PlanEntry};

type Merged = Shared<LocalBoxFuture<'static, Result<Values, ResolveError>>>;

/// The mutable state of a single execution, shared by its entries.
#[derive(Default)]
struct Run {
    values: RefCell<Values>,
    failure: RefCell<Option<ResolveError>>,
}

impl Run {
    /// Records the first failure, later ones are ignored.
    fn fail(&self, err: &ResolveError) {
        self.failure.borrow_mut().get_or_insert_with(|| err.clone());
    }

    fn failure(&self) -> Option<ResolveError> {
        self.failure.borrow().clone()
    }
}

/// The outcome of executing a [`Plan`], usable as the parent of further
/// resolutions.
///
/// A resolution is a future of the merged values. Awaiting it drives every
/// invocable of the plan. Cloning it is cheap and every clone observes the
/// same outcome.
#[derive(Clone)]
pub struct Resolution {
    run: Rc<Run>,
    promises: Rc<HashMap<String, Promise>>,
    inherited: Rc<Values>,
    merged: Merged,
}

impl Resolution {
    fn failed(cause: ResolveError) -> Self {
        let run = Run::default();
        run.fail(&cause);

        Self {
            run: Rc::new(run),
            promises: Rc::default(),
            inherited: Rc::default(),
            merged: futures::future::ready(Err(cause)).boxed_local().shared(),
        }
    }

    /// The merged values, once the resolution has settled successfully.
    pub fn values(&self) -> Option<Values> {
        match self.merged.peek() {
            Some(Ok(values)) => Some(values.clone()),
            _ => None,
        }
    }

    /// The first recorded failure, available as soon as any invocable fails.
    pub fn failure(&self) -> Option<ResolveError> {
        self.run.failure()
    }

    /// Values taken over from the parent chain, without the names this
    /// resolution computes itself.
    pub fn inherited(&self) -> &Values {
        &self.inherited
    }

    pub fn is_settled(&self) -> bool {
        self.merged.peek().is_some()
    }

    /// Whether a pending result is published under `name`, either by this
    /// resolution or by one of its ancestors.
    pub fn has_promise(&self, name: &str) -> bool {
        self.promises.contains_key(name)
    }

    /// The pending result published under `name`, by this resolution or by
    /// one of its ancestors. Awaiting it drives that entry alone.
    pub fn promise(&self, name: &str) -> Option<Promise> {
        self.promises.get(name).cloned()
    }
}

impl Future for Resolution {
    type Output = Result<Values, ResolveError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.merged.poll_unpin(cx)
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut promises: Vec<_> = self.promises.keys().collect();
        promises.sort();

        f.debug_struct("Resolution")
            .field("promises", &promises)
            .field("inherited", &self.inherited)
            .field("settled", &self.is_settled())
            .field("failure", &self.failure())
            .finish()
    }
}

pub(crate) fn execute(
    plan: &Plan,
    locals: Values,
    parent: Option<&Resolution>,
    context: Option<Dynamic>,
) -> Resolution {
    if let Some(cause) = parent.and_then(Resolution::failure) {
        tracing::debug!("parent resolution failed, failing immediately");
        return Resolution::failed(cause);
    }

    let own = plan.names.iter().map(String::as_str);
    let run = Rc::new(Run {
        values: RefCell::new(locals.clone()),
        failure: RefCell::new(None),
    });

    let mut promises = HashMap::new();
    let mut inherited = Values::new();
    let mut waits: Vec<LocalBoxFuture<'static, Result<(), ResolveError>>> = Vec::new();

    if let Some(parent) = parent {
        promises.extend(
            parent
                .promises
                .iter()
                .map(|(name, promise)| (name.clone(), promise.clone())),
        );

        let upstream = parent.inherited.omit(own.clone());
        run.values.borrow_mut().merge_missing(&upstream);

        match parent.values() {
            Some(values) => {
                inherited = values.omit(own);
                run.values.borrow_mut().merge_missing(&inherited);
            }
            None => {
                inherited = upstream;
                waits.push(parent.clone().map(|result| result.map(|_| ())).boxed_local());
            }
        }
    }

    for entry in plan.entries.iter() {
        if locals.contains(&entry.name) {
            continue;
        }

        // A dependency on the entry's own name still sees the parent's
        // promise here, the entry's own one is published below.
        let dependencies: Vec<(String, Promise)> = entry
            .dependencies
            .iter()
            .filter(|dependency| !locals.contains(dependency))
            .filter_map(|dependency| {
                let promise = promises.get(dependency)?;
                Some((dependency.clone(), Promise::clone(promise)))
            })
            .collect();

        let promise = invoke(
            entry.clone(),
            dependencies,
            Rc::clone(&run),
            Rc::clone(&plan.injector),
            context.clone(),
        );

        waits.push(promise.clone().map(|result| result.map(|_| ())).boxed_local());
        promises.insert(entry.name.clone(), promise);
    }

    let merged = {
        let run = Rc::clone(&run);
        let parent = parent.cloned();

        async move {
            if let Err(err) = try_join_all(waits).await {
                run.fail(&err);
                return Err(err);
            }

            let mut values = run.values.borrow().clone();
            if let Some(parent) = parent.and_then(|parent| parent.values()) {
                values.merge_missing(&parent);
            }

            Ok(values)
        }
        .boxed_local()
        .shared()
    };

    Resolution {
        run,
        promises: Rc::new(promises),
        inherited: Rc::new(inherited),
        merged,
    }
}

/// Builds the pending result of a single plan entry.
///
/// The entry waits for every dependency it has a promise for, then runs with
/// all values known to the resolution at that point.
fn invoke(
    entry: PlanEntry,
    dependencies: Vec<(String, Promise)>,
    run: Rc<Run>,
    injector: Rc<dyn Injector>,
    context: Option<Dynamic>,
) -> Promise {
    async move {
        let pending = dependencies.into_iter().map(|(name, promise)| {
            promise.map(move |result| result.map(|value| (name, value)))
        });

        let settled = match try_join_all(pending).await {
            Ok(settled) => settled,
            Err(err) => {
                run.fail(&err);
                return Err(err);
            }
        };

        {
            let mut values = run.values.borrow_mut();
            for (name, value) in settled {
                values.insert_dynamic(name, value);
            }
        }

        if let Some(cause) = run.failure() {
            return Err(cause);
        }

        tracing::trace!(entry = entry.name(), "invoking plan entry");

        let arguments = run.values.borrow().clone();
        let context = context.as_deref().map(|context| context as &dyn Any);

        let result = match injector.invoke(&entry.invocable, context, &arguments) {
            Ok(outcome) => outcome.settle().await,
            Err(err) => Err(err),
        };

        match result {
            Ok(value) => {
                run.values
                    .borrow_mut()
                    .insert_dynamic(entry.name.clone(), value.clone());
                Ok(value)
            }
            Err(err) => {
                let err = ResolveError::invocation(entry.name.as_str(), err);
                tracing::debug!(entry = entry.name(), "plan entry failed: {err}");
                run.fail(&err);
                Err(err)
            }
        }
    }
    .boxed_local()
    .shared()
}
