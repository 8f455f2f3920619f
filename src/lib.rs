#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod error;
mod injector;
mod path;
mod resolver;
mod state;
mod utils;

pub use crate::core::{Dynamic, Outcome, Promise, Values, dynamic};
pub use crate::error::{CycleError, ResolveError};
pub use crate::injector::{Call, Injector, Invocable, Services};
pub use crate::path::{Path, PathElement, Resolvable};
pub use crate::resolver::{Plan, PlanEntry, Resolution, Resolver};
pub use crate::state::{PolicySpec, ResolvePolicy, State};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
