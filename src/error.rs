use std::fmt::{Display, Formatter};
use std::sync::Arc;

use thiserror::Error;

/// A dependency cycle found while studying a mapping of invocables.
///
/// The trace starts at the first name that was revisited and lists every name
/// on the cycle once, in the order the visit reached them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub(crate) trace: Vec<String>,
}

impl CycleError {
    /// Names on the cycle, in visitation order.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }
}

impl Display for CycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // close the loop back to the first name
        let mut names = self.trace.iter().chain(self.trace.first());

        if let Some(first) = names.next() {
            write!(f, "{first}")?;
        }

        for name in names {
            write!(f, " -> {name}")?;
        }

        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Every way a resolution can fail.
///
/// The error is cheap to clone, a single failure is observed by every unit
/// waiting on the one that failed, and by the overall resolution.
#[derive(Debug, Error, Clone)]
pub enum ResolveError {
    #[error("Cyclic dependency: {0}")]
    Cycle(#[from] CycleError),

    #[error("State '{0}' is not an element of this path")]
    ElementNotFound(String),

    #[error("State '{0}' is no longer part of a live path")]
    Detached(String),

    #[error("State '{0}' appears more than once in a path")]
    DuplicateState(String),

    #[error("Unknown resolve policy '{0}', expected one of: eager, lazy, jit")]
    UnknownPolicy(String),

    #[error("Service '{0}' is not registered")]
    ServiceNotFound(String),

    #[error("Service '{0}' can only be fetched through an injector")]
    NotCallable(String),

    #[error("Value '{0}' is undefined")]
    Undefined(String),

    #[error("Value '{name}' is not of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Invocable '{name}':\n{cause}")]
    Invocation {
        name: String,
        cause: Arc<anyhow::Error>,
    },
}

impl ResolveError {
    pub(crate) fn invocation(name: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self::Invocation {
            name: name.into(),
            cause: Arc::new(err.into()),
        }
    }
}
