//! PR impact analyzer
//!
//! Given the qualified identifiers changed by a patch, report the blast
//! radius: direct callers and callees plus the transitive caller
//! closure to a bounded depth. Identifiers the graph has never seen are
//! classified rather than silently reported as zero-impact.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::core::query::{GraphQuery, QueryError};
use crate::storage::GraphStore;

pub const DEFAULT_IMPACT_DEPTH: u32 = 3;

/// How much the graph knows about a changed identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactStatus {
    /// The entity exists in the graph
    Known,
    /// The entity is absent but its file was parsed, so it is new code
    NewEntity,
    /// Neither the entity nor its file is in the graph
    Unknown,
}

/// Impact record for one changed identifier
#[derive(Debug, Clone, Serialize)]
pub struct EntityImpact {
    pub qualified_id: String,
    pub status: ImpactStatus,
    pub direct_callers: Vec<String>,
    pub direct_callees: Vec<String>,
    pub transitive_callers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ImpactReport {
    pub max_depth: u32,
    pub entries: Vec<EntityImpact>,
}

pub struct ImpactAnalyzer<'a> {
    store: &'a GraphStore,
    project_id: i64,
    max_depth: u32,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(store: &'a GraphStore, project_id: i64, max_depth: u32) -> Self {
        Self {
            store,
            project_id,
            max_depth: max_depth.max(1),
        }
    }

    pub fn analyze(&self, changed: &[String]) -> Result<ImpactReport, QueryError> {
        GraphQuery::new(self.store, self.project_id).ensure_ready()?;

        let mut entries = Vec::with_capacity(changed.len());
        for qualified_id in changed {
            entries.push(self.impact_of(qualified_id)?);
        }
        Ok(ImpactReport {
            max_depth: self.max_depth,
            entries,
        })
    }

    fn impact_of(&self, qualified_id: &str) -> Result<EntityImpact, QueryError> {
        let Some(node) = self
            .store
            .get_node_by_qualified(self.project_id, qualified_id)?
        else {
            // No prior callers to report either way; the distinction is
            // whether the file itself was ever parsed
            let status = if self.file_is_parsed(qualified_id)? {
                ImpactStatus::NewEntity
            } else {
                ImpactStatus::Unknown
            };
            debug!(qualified_id, ?status, "changed identifier not in graph");
            return Ok(EntityImpact {
                qualified_id: qualified_id.to_string(),
                status,
                direct_callers: Vec::new(),
                direct_callees: Vec::new(),
                transitive_callers: Vec::new(),
            });
        };

        let direct_callers: Vec<String> = self
            .store
            .callers_of(node.id)?
            .into_iter()
            .map(|n| n.qualified_id)
            .collect();
        let direct_callees: Vec<String> = self
            .store
            .callees_of(node.id)?
            .into_iter()
            .map(|n| n.qualified_id)
            .collect();
        let transitive_callers = self.transitive_callers(node.id, qualified_id)?;

        Ok(EntityImpact {
            qualified_id: qualified_id.to_string(),
            status: ImpactStatus::Known,
            direct_callers,
            direct_callees,
            transitive_callers,
        })
    }

    /// Breadth-first caller closure up to max_depth, excluding the
    /// changed entity itself.
    fn transitive_callers(
        &self,
        node_id: i64,
        qualified_id: &str,
    ) -> Result<Vec<String>, QueryError> {
        let mut visited: HashSet<i64> = HashSet::from([node_id]);
        let mut frontier = vec![node_id];
        let mut closure = Vec::new();

        for _ in 0..self.max_depth {
            let mut next = Vec::new();
            for id in frontier {
                for caller in self.store.callers_of(id)? {
                    if visited.insert(caller.id) {
                        if caller.qualified_id != qualified_id {
                            closure.push(caller.qualified_id);
                        }
                        next.push(caller.id);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        closure.sort();
        Ok(closure)
    }

    fn file_is_parsed(&self, qualified_id: &str) -> Result<bool, QueryError> {
        let file_part = qualified_id.split("::").next().unwrap_or(qualified_id);
        Ok(self
            .store
            .get_file_by_path(self.project_id, file_part)?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{BuildStatus, EdgeKind, NodeKind, NodeRecord};

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
        let (id, _) = store
            .upsert_node(&NodeRecord {
                id: 0,
                project_id,
                file_id: None,
                kind: NodeKind::Function,
                name: qualified_id
                    .rsplit("::")
                    .next()
                    .unwrap_or(qualified_id)
                    .to_string(),
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
    fn known_entity_reports_callers_and_callees() {
        let (store, project_id) = graph();
        let foo = add_fn(&store, project_id, "a.py::foo");
        let bar = add_fn(&store, project_id, "b.py::bar");
        let baz = add_fn(&store, project_id, "b.py::baz");
        call(&store, project_id, foo, bar);
        call(&store, project_id, bar, baz);

        let analyzer = ImpactAnalyzer::new(&store, project_id, 3);
        let report = analyzer.analyze(&["b.py::bar".to_string()]).unwrap();
        let entry = &report.entries[0];
        assert_eq!(entry.status, ImpactStatus::Known);
        assert_eq!(entry.direct_callers, vec!["a.py::foo"]);
        assert_eq!(entry.direct_callees, vec!["b.py::baz"]);
        assert_eq!(entry.transitive_callers, vec!["a.py::foo"]);
    }

    #[test]
    fn transitive_closure_respects_depth() {
        let (store, project_id) = graph();
        // d -> c -> b -> a, analyzing a with depth 2
        let a = add_fn(&store, project_id, "f.py::a");
        let b = add_fn(&store, project_id, "f.py::b");
        let c = add_fn(&store, project_id, "f.py::c");
        let d = add_fn(&store, project_id, "f.py::d");
        call(&store, project_id, b, a);
        call(&store, project_id, c, b);
        call(&store, project_id, d, c);

        let analyzer = ImpactAnalyzer::new(&store, project_id, 2);
        let report = analyzer.analyze(&["f.py::a".to_string()]).unwrap();
        assert_eq!(
            report.entries[0].transitive_callers,
            vec!["f.py::b", "f.py::c"]
        );
    }

    #[test]
    fn recursive_callers_terminate() {
        let (store, project_id) = graph();
        let foo = add_fn(&store, project_id, "a.py::foo");
        let bar = add_fn(&store, project_id, "b.py::bar");
        call(&store, project_id, foo, bar);
        call(&store, project_id, bar, foo);

        let analyzer = ImpactAnalyzer::new(&store, project_id, 5);
        let report = analyzer.analyze(&["b.py::bar".to_string()]).unwrap();
        assert_eq!(report.entries[0].transitive_callers, vec!["a.py::foo"]);
    }

    #[test]
    fn absent_entity_in_parsed_file_is_new() {
        let (store, project_id) = graph();
        store.insert_file(project_id, "a.py", "python", "h").unwrap();

        let analyzer = ImpactAnalyzer::new(&store, project_id, 3);
        let report = analyzer.analyze(&["a.py::brand_new".to_string()]).unwrap();
        assert_eq!(report.entries[0].status, ImpactStatus::NewEntity);
        assert!(report.entries[0].direct_callers.is_empty());
    }

    #[test]
    fn absent_file_is_unknown_not_empty() {
        let (store, project_id) = graph();
        let analyzer = ImpactAnalyzer::new(&store, project_id, 3);
        let report = analyzer
            .analyze(&["never/parsed.py::ghost".to_string()])
            .unwrap();
        assert_eq!(report.entries[0].status, ImpactStatus::Unknown);
    }

    #[test]
    fn impact_gates_on_build_status() {
        let (store, project_id) = graph();
        store
            .set_build_status(project_id, BuildStatus::Pending)
            .unwrap();
        let analyzer = ImpactAnalyzer::new(&store, project_id, 3);
        assert!(matches!(
            analyzer.analyze(&["a.py::x".to_string()]).unwrap_err(),
            QueryError::NotReady(_)
        ));
    }
}
