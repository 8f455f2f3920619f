use std::collections::HashMap;
use std::fmt::Display;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::injector::Invocable;

/// When a resolvable has to be resolved relative to entering the position
/// which declares it.
///
/// Policies are ordered by strictness, `Eager > Lazy > Jit`. Resolving at a
/// given policy resolves everything at that policy or stricter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvePolicy {
    /// Just in time, only once something asks for the value.
    #[default]
    Jit = 1,
    /// Before the position's own views are entered.
    Lazy = 2,
    /// Up front, together with the whole path.
    Eager = 3,
}

impl ResolvePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvePolicy::Jit => "jit",
            ResolvePolicy::Lazy => "lazy",
            ResolvePolicy::Eager => "eager",
        }
    }
}

impl FromStr for ResolvePolicy {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jit" => Ok(ResolvePolicy::Jit),
            "lazy" => Ok(ResolvePolicy::Lazy),
            "eager" => Ok(ResolvePolicy::Eager),
            other => Err(ResolveError::UnknownPolicy(other.to_string())),
        }
    }
}

impl Display for ResolvePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The policy annotation of a position: one policy for everything it
/// declares, or a policy per resolvable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicySpec {
    Whole(ResolvePolicy),
    PerName(HashMap<String, ResolvePolicy>),
}

/// A declaring position: a named place in a hierarchy which declares zero or
/// more invocables.
///
/// ```rust
/// use keiro::{Invocable, ResolvePolicy, State};
///
/// let state = State::new("home")
///     .resolve("user", Invocable::service("session"))
///     .policy(ResolvePolicy::Lazy);
///
/// assert_eq!(state.policy_of("user"), ResolvePolicy::Lazy);
/// ```
#[derive(Debug, Clone)]
pub struct State {
    name: String,
    resolve: IndexMap<String, Invocable>,
    default_policy: Option<ResolvePolicy>,
    policies: HashMap<String, ResolvePolicy>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolve: IndexMap::new(),
            default_policy: None,
            policies: HashMap::new(),
        }
    }

    /// Declares an invocable under `name`. Declaring the same name twice keeps
    /// the latest invocable in the original position.
    pub fn resolve(mut self, name: impl Into<String>, invocable: Invocable) -> Self {
        self.resolve.insert(name.into(), invocable);
        self
    }

    /// Sets the default policy for everything this position declares.
    pub fn policy(mut self, policy: ResolvePolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Overrides the policy of a single resolvable.
    pub fn policy_for(mut self, name: impl Into<String>, policy: ResolvePolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Applies a policy annotation, e.g. one read from a route definition.
    pub fn policy_spec(self, spec: PolicySpec) -> Self {
        match spec {
            PolicySpec::Whole(policy) => self.policy(policy),
            PolicySpec::PerName(map) => map
                .into_iter()
                .fold(self, |state, (name, policy)| state.policy_for(name, policy)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The invocables declared by this position, in declaration order.
    pub fn invocables(&self) -> &IndexMap<String, Invocable> {
        &self.resolve
    }

    /// The effective policy of `name`: its own override, else the position's
    /// default, else [`ResolvePolicy::Jit`].
    pub fn policy_of(&self, name: &str) -> ResolvePolicy {
        self.policies
            .get(name)
            .copied()
            .or(self.default_policy)
            .unwrap_or_default()
    }

    pub fn into_rc(self) -> Rc<State> {
        Rc::new(self)
    }
}
