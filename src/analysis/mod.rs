//! Graph analyses
//!
//! Architectural findings (dependency cycles, unused entities) and PR
//! impact reports. All analyzers run read-only over a completed build
//! and fail fast with NotReady otherwise.

pub mod cycles;
pub mod impact;

use serde::Serialize;

use crate::core::query::Location;
use crate::storage::models::NodeKind;
use crate::storage::GraphStore;

pub use cycles::ArchitectureAnalyzer;
pub use impact::{EntityImpact, ImpactAnalyzer, ImpactReport, ImpactStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    CircularDependency,
    UnusedEntity,
}

/// One analyzer result record
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub description: String,
    pub locations: Vec<Location>,
}

/// Definition location of a node, when it has one in this project.
fn location_of(
    store: &GraphStore,
    project_id: i64,
    qualified_id: &str,
) -> Result<Option<Location>, crate::storage::StoreError> {
    let Some(node) = store.get_node_by_qualified(project_id, qualified_id)? else {
        return Ok(None);
    };
    if node.kind == NodeKind::File {
        return Ok(Some(Location {
            file: node.qualified_id,
            start_line: node.start_line,
            end_line: node.end_line,
        }));
    }
    Ok(store.file_path_of_node(node.id)?.map(|file| Location {
        file,
        start_line: node.start_line,
        end_line: node.end_line,
    }))
}
