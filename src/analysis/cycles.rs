//! Architectural analyzer
//!
//! Dependency-cycle detection over call or import adjacency, and
//! unused-entity detection over inbound reference counts. Every
//! elementary cycle is reported exactly once, starting from its
//! lexicographically smallest member.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::analysis::{location_of, Finding, FindingKind, Severity};
use crate::core::query::{CallScope, GraphQuery, QueryError};
use crate::storage::models::NodeKind;
use crate::storage::GraphStore;

const UNUSED_KINDS: &[NodeKind] = &[
    NodeKind::Function,
    NodeKind::Method,
    NodeKind::Class,
    NodeKind::Interface,
    NodeKind::Struct,
];

pub struct ArchitectureAnalyzer<'a> {
    store: &'a GraphStore,
    project_id: i64,
}

impl<'a> ArchitectureAnalyzer<'a> {
    pub fn new(store: &'a GraphStore, project_id: i64) -> Self {
        Self { store, project_id }
    }

    /// Detect dependency cycles in the given edge scope.
    pub fn detect_cycles(&self, scope: CallScope) -> Result<Vec<Finding>, QueryError> {
        let query = GraphQuery::new(self.store, self.project_id);
        let edges = query.call_edges(scope)?;

        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (source, target) in edges {
            adjacency.entry(source).or_default().push(target);
        }
        for targets in adjacency.values_mut() {
            targets.sort();
            targets.dedup();
        }

        let cycles = find_cycles(&adjacency);
        debug!(
            scope = ?scope,
            cycles = cycles.len(),
            "cycle detection finished"
        );

        let mut findings = Vec::new();
        for cycle in cycles {
            let mut locations = Vec::new();
            for member in &cycle {
                if let Some(loc) = location_of(self.store, self.project_id, member)? {
                    locations.push(loc);
                }
            }
            let mut description = cycle.join(" -> ");
            description.push_str(" -> ");
            description.push_str(&cycle[0]);
            findings.push(Finding {
                kind: FindingKind::CircularDependency,
                severity: Severity::Warning,
                description,
                locations,
            });
        }
        Ok(findings)
    }

    /// Entities with zero inbound calls/extends/implements edges that
    /// are not entry points.
    pub fn find_unused(&self, entry_points: &[String]) -> Result<Vec<Finding>, QueryError> {
        let query = GraphQuery::new(self.store, self.project_id);
        query.ensure_ready()?;

        let entry_set: HashSet<&str> = entry_points.iter().map(|s| s.as_str()).collect();
        let candidates = self.store.unreferenced_nodes(self.project_id, UNUSED_KINDS)?;

        let mut findings = Vec::new();
        for node in candidates {
            if entry_set.contains(node.name.as_str()) {
                continue;
            }
            let locations = location_of(self.store, self.project_id, &node.qualified_id)?
                .into_iter()
                .collect();
            findings.push(Finding {
                kind: FindingKind::UnusedEntity,
                severity: Severity::Info,
                description: format!(
                    "{} '{}' has no inbound references",
                    node.kind.as_str(),
                    node.qualified_id
                ),
                locations,
            });
        }
        Ok(findings)
    }
}

/// Enumerate every elementary cycle exactly once, rooted at its
/// lexicographically smallest member: the DFS from each start node
/// explores simple paths through nodes greater than the start and
/// records a cycle when an edge closes back to it. Overlapping cycles
/// that share nodes are each reported.
fn find_cycles(adjacency: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut found: BTreeSet<Vec<String>> = BTreeSet::new();

    for start in adjacency.keys() {
        let start = start.as_str();
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if *next == 0 {
                path.push(node);
                on_path.insert(node);
            }

            let neighbors = adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
            if *next < neighbors.len() {
                let neighbor = neighbors[*next].as_str();
                *next += 1;

                if neighbor == start {
                    found.insert(path.iter().map(|s| s.to_string()).collect());
                } else if neighbor > start && !on_path.contains(neighbor) {
                    stack.push((neighbor, 0));
                }
            } else {
                stack.pop();
                path.pop();
                on_path.remove(node);
            }
        }
    }

    found.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{BuildStatus, EdgeKind, NodeRecord};

    fn graph() -> (GraphStore, i64) {
        let store = GraphStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        let project_id = store.upsert_project("proj", "/tmp/proj").unwrap();
        store
            .set_build_status(project_id, BuildStatus::Complete)
            .unwrap();
        (store, project_id)
    }

    fn add_fn(store: &GraphStore, project_id: i64, qualified_id: &str) -> i64 {
        let name = qualified_id
            .rsplit("::")
            .next()
            .unwrap_or(qualified_id)
            .to_string();
        let (id, _) = store
            .upsert_node(&NodeRecord {
                id: 0,
                project_id,
                file_id: None,
                kind: NodeKind::Function,
                name,
                qualified_id: qualified_id.to_string(),
                start_line: 1,
                end_line: 2,
                language: "python".to_string(),
            })
            .unwrap();
        id
    }

    fn call(store: &GraphStore, project_id: i64, from: i64, to: i64) {
        store.insert_edge(project_id, from, to, EdgeKind::Calls).unwrap();
    }

    #[test]
    fn three_node_cycle_reported_once_from_smallest_member() {
        let (store, project_id) = graph();
        let a = add_fn(&store, project_id, "c.py::a");
        let b = add_fn(&store, project_id, "a.py::b");
        let c = add_fn(&store, project_id, "b.py::c");
        call(&store, project_id, a, b);
        call(&store, project_id, b, c);
        call(&store, project_id, c, a);

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        let findings = analyzer.detect_cycles(CallScope::Calls).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].description,
            "a.py::b -> b.py::c -> c.py::a -> a.py::b"
        );
        assert_eq!(findings[0].kind, FindingKind::CircularDependency);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (store, project_id) = graph();
        let a = add_fn(&store, project_id, "a.py::recurse");
        call(&store, project_id, a, a);

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        let findings = analyzer.detect_cycles(CallScope::Calls).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].description, "a.py::recurse -> a.py::recurse");
    }

    #[test]
    fn disjoint_cycles_both_found() {
        let (store, project_id) = graph();
        let a = add_fn(&store, project_id, "a.py::a");
        let b = add_fn(&store, project_id, "b.py::b");
        let x = add_fn(&store, project_id, "x.py::x");
        let y = add_fn(&store, project_id, "y.py::y");
        call(&store, project_id, a, b);
        call(&store, project_id, b, a);
        call(&store, project_id, x, y);
        call(&store, project_id, y, x);

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        let findings = analyzer.detect_cycles(CallScope::Calls).unwrap();
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn overlapping_cycles_sharing_a_node_are_both_found() {
        let (store, project_id) = graph();
        let a = add_fn(&store, project_id, "f.py::a");
        let b = add_fn(&store, project_id, "f.py::b");
        let c = add_fn(&store, project_id, "f.py::c");
        let d = add_fn(&store, project_id, "f.py::d");
        call(&store, project_id, a, b);
        call(&store, project_id, b, d);
        call(&store, project_id, d, a);
        call(&store, project_id, a, c);
        call(&store, project_id, c, d);

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        let findings = analyzer.detect_cycles(CallScope::Calls).unwrap();
        let descriptions: Vec<&str> =
            findings.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "f.py::a -> f.py::b -> f.py::d -> f.py::a",
                "f.py::a -> f.py::c -> f.py::d -> f.py::a",
            ]
        );
    }

    #[test]
    fn acyclic_graph_has_no_findings() {
        let (store, project_id) = graph();
        let a = add_fn(&store, project_id, "a.py::a");
        let b = add_fn(&store, project_id, "b.py::b");
        let c = add_fn(&store, project_id, "c.py::c");
        call(&store, project_id, a, b);
        call(&store, project_id, a, c);
        call(&store, project_id, b, c);

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        assert!(analyzer.detect_cycles(CallScope::Calls).unwrap().is_empty());
    }

    #[test]
    fn unused_detection_skips_entry_points() {
        let (store, project_id) = graph();
        let main = add_fn(&store, project_id, "app.py::main");
        let helper = add_fn(&store, project_id, "app.py::helper");
        let dead = add_fn(&store, project_id, "app.py::dead");
        call(&store, project_id, main, helper);
        let _ = dead;

        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        let findings = analyzer.find_unused(&["main".to_string()]).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("app.py::dead"));
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn analyzers_gate_on_build_status() {
        let (store, project_id) = graph();
        store
            .set_build_status(project_id, BuildStatus::Pending)
            .unwrap();
        let analyzer = ArchitectureAnalyzer::new(&store, project_id);
        assert!(matches!(
            analyzer.detect_cycles(CallScope::Calls).unwrap_err(),
            QueryError::NotReady(_)
        ));
        assert!(matches!(
            analyzer.find_unused(&[]).unwrap_err(),
            QueryError::NotReady(_)
        ));
    }
}
