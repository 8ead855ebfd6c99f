//! Dependency leveling for candidate services.
//!
//! Candidates are grouped into levels such that every service lands strictly
//! after all of its prerequisites that are also candidates. Prerequisites
//! outside the candidate set are ignored. Output is a pure function of the
//! inputs: levels are built from ordered maps and sorted alphabetically.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Service name -> prerequisite service names.
pub type DependencyTable = BTreeMap<String, Vec<String>>;

/// Services with no ordering constraint among themselves, sorted by name.
pub type ExecutionLevel = Vec<String>;

/// Why leveling could not produce a strict dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// No candidate was free of in-set prerequisites; one level per candidate
    /// in input order.
    NoRoots,
    /// A cycle blocked these services; they run together in a final level.
    Cycle { services: Vec<String> },
}

/// Ordered levels for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub levels: Vec<ExecutionLevel>,
    pub degradation: Option<Degradation>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn service_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Index of the level that contains `service`.
    pub fn level_of(&self, service: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|name| name == service))
    }
}

/// Build execution levels for `candidates` using `table`.
///
/// `candidates` order only matters for the no-roots fallback; duplicates are
/// dropped, keeping the first occurrence.
pub fn build_levels(candidates: &[String], table: &DependencyTable) -> ExecutionPlan {
    let mut seen = BTreeSet::new();
    let candidates: Vec<&str> = candidates
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect();
    if candidates.is_empty() {
        return ExecutionPlan::default();
    }

    let mut in_degree: BTreeMap<&str, usize> = candidates.iter().map(|name| (*name, 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for service in &candidates {
        let prerequisites: BTreeSet<&str> = table
            .get(*service)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default();
        for dep in prerequisites {
            if !in_degree.contains_key(dep) {
                continue;
            }
            dependents.entry(dep).or_default().push(*service);
            if let Some(degree) = in_degree.get_mut(service) {
                *degree += 1;
            }
        }
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    if current.is_empty() {
        warn!(
            services = %candidates.join(", "),
            "no service is free of dependencies; running one at a time in input order"
        );
        return ExecutionPlan {
            levels: candidates.iter().map(|name| vec![name.to_string()]).collect(),
            degradation: Some(Degradation::NoRoots),
        };
    }

    let mut levels: Vec<ExecutionLevel> = Vec::new();
    let mut placed = 0usize;
    while !current.is_empty() {
        current.sort_unstable();
        placed += current.len();
        let mut next = Vec::new();
        for service in &current {
            for dependent in dependents.get(service).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        debug!(level = levels.len() + 1, services = %current.join(", "), "level resolved");
        levels.push(current.iter().map(|name| name.to_string()).collect());
        current = next;
    }

    let mut degradation = None;
    if placed < candidates.len() {
        let remaining: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        warn!(
            services = %remaining.join(", "),
            "circular dependency detected; these services run last in alphabetical order"
        );
        levels.push(remaining.clone());
        degradation = Some(Degradation::Cycle {
            services: remaining,
        });
    }

    ExecutionPlan {
        levels,
        degradation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &[&str])]) -> DependencyTable {
        entries
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|dep| dep.to_string()).collect(),
                )
            })
            .collect()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn chain_produces_one_level_per_tier() {
        let deps = table(&[
            ("identity", &[]),
            ("network", &["identity"]),
            ("compute", &["network", "identity"]),
        ]);
        let plan = build_levels(&names(&["compute", "identity", "network"]), &deps);
        assert_eq!(
            plan.levels,
            vec![names(&["identity"]), names(&["network"]), names(&["compute"])]
        );
        assert_eq!(plan.degradation, None);
    }

    #[test]
    fn prerequisites_outside_candidates_are_ignored() {
        let deps = table(&[
            ("identity", &[]),
            ("oss", &["identity"]),
            ("tagging", &["identity"]),
        ]);
        let plan = build_levels(&names(&["tagging", "oss"]), &deps);
        assert_eq!(plan.levels, vec![names(&["oss", "tagging"])]);
    }

    #[test]
    fn unknown_services_have_no_prerequisites() {
        let plan = build_levels(&names(&["zeta", "alpha"]), &DependencyTable::new());
        assert_eq!(plan.levels, vec![names(&["alpha", "zeta"])]);
    }

    #[test]
    fn full_cycle_falls_back_to_input_order_singletons() {
        let deps = table(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let plan = build_levels(&names(&["b", "c", "a"]), &deps);
        assert_eq!(plan.levels, vec![names(&["b"]), names(&["c"]), names(&["a"])]);
        assert_eq!(plan.degradation, Some(Degradation::NoRoots));
    }

    #[test]
    fn partial_cycle_is_appended_as_final_sorted_level() {
        let deps = table(&[
            ("identity", &[]),
            ("x", &["identity", "y"]),
            ("y", &["x"]),
        ]);
        let plan = build_levels(&names(&["y", "x", "identity"]), &deps);
        assert_eq!(plan.levels, vec![names(&["identity"]), names(&["x", "y"])]);
        assert_eq!(
            plan.degradation,
            Some(Degradation::Cycle {
                services: names(&["x", "y"])
            })
        );
    }

    #[test]
    fn duplicate_prerequisites_count_once() {
        let deps = table(&[("identity", &[]), ("network", &["identity", "identity"])]);
        let plan = build_levels(&names(&["network", "identity"]), &deps);
        assert_eq!(plan.levels, vec![names(&["identity"]), names(&["network"])]);
    }

    #[test]
    fn every_service_lands_after_its_prerequisites() {
        let deps = crate::io::config::default_dependencies();
        let candidates: Vec<String> = deps.keys().cloned().collect();
        let plan = build_levels(&candidates, &deps);
        assert_eq!(plan.degradation, None);
        assert_eq!(plan.service_count(), candidates.len());
        for (service, prerequisites) in &deps {
            let level = plan.level_of(service).expect("placed");
            for dep in prerequisites {
                assert!(plan.level_of(dep).expect("dep placed") < level, "{dep} before {service}");
            }
        }
    }

    #[test]
    fn leveling_is_deterministic_across_input_orders() {
        let deps = crate::io::config::default_dependencies();
        let mut candidates: Vec<String> = deps.keys().cloned().collect();
        let first = build_levels(&candidates, &deps);
        candidates.reverse();
        let second = build_levels(&candidates, &deps);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_candidates_produce_empty_plan() {
        assert!(build_levels(&[], &DependencyTable::new()).is_empty());
    }
}
