use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::rc::Rc;

use indexmap::IndexMap;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Control, DfsEvent, depth_first_search};

use crate::core::{Dynamic, Values};
use crate::error::CycleError;
use crate::injector::{Injector, Invocable};
use crate::resolver::Resolution;

/// One step of a [`Plan`].
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub(crate) name: String,
    pub(crate) invocable: Invocable,
    pub(crate) dependencies: Vec<String>,
}

impl PlanEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invocable(&self) -> &Invocable {
        &self.invocable
    }

    /// Every declared dependency, including ones which are not part of the
    /// studied mapping.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// A mapping of invocables in an order where every entry comes after
/// everything it depends on.
///
/// A plan does not depend on any particular locals or parent, it is computed
/// once and can be executed any number of times with [`Plan::resolve`].
#[derive(Clone)]
pub struct Plan {
    pub(crate) injector: Rc<dyn Injector>,
    pub(crate) entries: Rc<[PlanEntry]>,
    pub(crate) names: Rc<HashSet<String>>,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Entry names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(PlanEntry::name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Executes the plan.
    ///
    /// * `locals` are never overridden, an entry named like a local is skipped.
    /// * `parent` is an earlier resolution whose values are inherited.
    /// * `context` is handed to every invocable as its invocation context.
    pub fn resolve(
        &self,
        locals: Values,
        parent: Option<&Resolution>,
        context: Option<Dynamic>,
    ) -> Resolution {
        crate::resolver::resolution::execute(self, locals, parent, context)
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Renders the plan as a Mermaid graph, edges pointing from a dependency to
/// its dependent.
impl Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let mut index = HashMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let name = entry.name.replace('"', "\\\"");
            writeln!(f, "    {i}[\"{name}\"]")?;
            index.insert(entry.name.as_str(), i);
        }

        for (i, entry) in self.entries.iter().enumerate() {
            for dependency in &entry.dependencies {
                if dependency != &entry.name
                    && let Some(source) = index.get(dependency.as_str())
                {
                    writeln!(f, "    {source} --> {i}")?;
                }
            }
        }

        Ok(())
    }
}

/// Orders `invocables` with a depth-first topological sort.
///
/// Edges only connect names within the mapping. Dependencies outside of it are
/// expected to come from locals or a parent resolution, and a dependency on the
/// entry's own name refers to the parent's value, so neither becomes an edge.
pub(crate) fn study(
    injector: Rc<dyn Injector>,
    invocables: &IndexMap<String, Invocable>,
) -> Result<Plan, CycleError> {
    let mut graph = DiGraphMap::<&str, ()>::with_capacity(invocables.len(), invocables.len());

    for name in invocables.keys() {
        graph.add_node(name.as_str());
    }

    for (name, invocable) in invocables {
        for dependency in injector.dependencies(invocable) {
            if dependency != name && invocables.contains_key(dependency.as_str()) {
                graph.add_edge(name.as_str(), dependency.as_str(), ());
            }
        }
    }

    let mut trace = Vec::new();
    let mut order = Vec::with_capacity(invocables.len());

    // post-order puts every dependency before its dependents
    let control = depth_first_search(&graph, invocables.keys().map(String::as_str), |event| {
        match event {
            DfsEvent::Discover(name, _) => trace.push(name),
            DfsEvent::Finish(name, _) => {
                trace.pop();
                order.push(name);
            }
            DfsEvent::BackEdge(_, name) => {
                let start = trace
                    .iter()
                    .position(|visited| *visited == name)
                    .unwrap_or_default();

                return Control::Break(
                    trace[start..]
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                );
            }
            _ => {}
        }

        Control::Continue
    });

    if let Some(trace) = control.break_value() {
        return Err(CycleError { trace });
    }

    let entries: Vec<PlanEntry> = order
        .into_iter()
        .filter_map(|name| {
            let (name, invocable) = invocables.get_key_value(name)?;
            Some(PlanEntry {
                name: name.clone(),
                invocable: invocable.clone(),
                dependencies: injector.dependencies(invocable).to_vec(),
            })
        })
        .collect();

    tracing::debug!(entries = entries.len(), "studied invocables");

    Ok(Plan {
        injector,
        entries: entries.into(),
        names: Rc::new(invocables.keys().cloned().collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Outcome;
    use crate::injector::Services;

    fn depends(on: &[&str]) -> Invocable {
        Invocable::new(on.iter().copied(), |_| Ok(Outcome::ready(())))
    }

    /// Builds a mapping where every name listed in `services` is a service
    /// invocable and everything else depends on the listed names.
    fn mapping(pairs: &[(&str, &[&str])], services: &[&str]) -> IndexMap<String, Invocable> {
        pairs
            .iter()
            .map(|(name, on)| {
                let invocable = if services.contains(name) {
                    Invocable::service(*name)
                } else {
                    depends(on)
                };
                (name.to_string(), invocable)
            })
            .collect()
    }

    fn study_of(pairs: &[(&str, &[&str])]) -> Result<Plan, CycleError> {
        study(Services::new().into_rc(), &mapping(pairs, &[]))
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.names().collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let cases: &[(&str, &[(&str, &[&str])], &[&str])] = &[
            ("chain", &[("c", &["b"]), ("b", &["a"]), ("a", &[])], &[]),
            (
                "diamond",
                &[("d", &["b", "c"]), ("b", &["a"]), ("c", &["a"]), ("a", &[])],
                &[],
            ),
            (
                "disconnected",
                &[("y", &["x"]), ("q", &[]), ("x", &[]), ("p", &["q"])],
                &[],
            ),
            (
                "external and services",
                &[
                    ("report", &["clock", "user", "from_parent"]),
                    ("user", &["session"]),
                    ("clock", &[]),
                    ("session", &[]),
                ],
                &["clock", "session"],
            ),
            (
                "self and reversed",
                &[("a", &["a"]), ("b", &["a"]), ("c", &["b", "a"]), ("d", &["c", "d"])],
                &[],
            ),
        ];

        for (label, pairs, services) in cases {
            let invocables = mapping(pairs, services);
            let plan = study(Services::new().into_rc(), &invocables).unwrap();
            let order = names(&plan);

            assert_eq!(order.len(), invocables.len(), "{label}");

            for (at, entry) in plan.entries().iter().enumerate() {
                for dependency in entry.dependencies() {
                    if dependency.as_str() != entry.name()
                        && let Some(dep) = order.iter().position(|name| *name == dependency.as_str())
                    {
                        assert!(
                            dep < at,
                            "{label}: '{dependency}' comes after '{}'",
                            entry.name()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_topological_order() {
        let plan = study_of(&[
            ("d", &["b", "c"]),
            ("c", &["a"]),
            ("b", &["a", "external"]),
            ("a", &[]),
        ])
        .unwrap();

        assert_eq!(names(&plan), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_trace_is_minimal() {
        let err = study_of(&[
            ("entry", &["a"]),
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
        ])
        .unwrap_err();

        assert_eq!(err.trace(), ["a", "b", "c"]);
        assert_eq!(err.to_string(), "a -> b -> c -> a");
    }

    #[test]
    fn test_two_node_cycle() {
        let err = study_of(&[("a", &["b"]), ("b", &["a"])]).unwrap_err();
        assert_eq!(err.trace(), ["a", "b"]);
    }

    #[test]
    fn test_self_dependency_is_not_a_cycle() {
        let plan = study_of(&[("x", &["x"]), ("y", &["x"])]).unwrap();

        assert_eq!(names(&plan), ["x", "y"]);
        assert_eq!(plan.entries()[0].dependencies(), ["x"]);
    }

    #[test]
    fn test_service_has_no_dependencies() {
        let invocables = mapping(&[("clock", &[]), ("now", &["clock"])], &["clock"]);
        let plan = study(Services::new().into_rc(), &invocables).unwrap();

        assert_eq!(names(&plan), ["clock", "now"]);
        assert!(plan.entries()[0].dependencies().is_empty());
    }

    #[test]
    fn test_mermaid() {
        let plan = study_of(&[("b", &["a"]), ("a", &[])]).unwrap();
        let text = plan.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("    0[\"a\"]\n"));
        assert!(text.contains("    1[\"b\"]\n"));
        assert!(text.contains("    0 --> 1\n"));
    }
}
