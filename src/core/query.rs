//! Graph query interface
//!
//! Read-only lookups over a built graph. Every operation checks the
//! project's build status first and refuses to answer over an
//! incomplete or failed build, so callers see NotReady instead of
//! partial results.

use serde::Serialize;
use thiserror::Error;

use crate::storage::models::{BuildStatus, NodeKind, NodeRecord};
use crate::storage::{GraphStore, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("graph not ready: build status is {0}")]
    NotReady(String),

    #[error("unsupported query: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A type definition with its location
#[derive(Debug, Clone, Serialize)]
pub struct TypeInfo {
    pub name: String,
    pub qualified_id: String,
    pub kind: String,
    pub language: String,
    pub file: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
}

/// A callable owned by a type
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub qualified_id: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Where a node is defined in the source tree
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Location {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Edge scope for adjacency queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallScope {
    Calls,
    Imports,
}

impl CallScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(Self::Calls),
            "imports" => Some(Self::Imports),
            _ => None,
        }
    }
}

/// Read-only query facade over one project's graph
pub struct GraphQuery<'a> {
    store: &'a GraphStore,
    project_id: i64,
}

impl<'a> GraphQuery<'a> {
    pub fn new(store: &'a GraphStore, project_id: i64) -> Self {
        Self { store, project_id }
    }

    /// Refuse to serve queries until the build finished cleanly.
    pub fn ensure_ready(&self) -> Result<(), QueryError> {
        match self.store.build_status(self.project_id)? {
            Some(BuildStatus::Complete) => Ok(()),
            Some(status) => Err(QueryError::NotReady(status.as_str().to_string())),
            None => Err(QueryError::NotFound(format!(
                "project {}",
                self.project_id
            ))),
        }
    }

    pub fn find_type(&self, qualified_id: &str) -> Result<TypeInfo, QueryError> {
        self.ensure_ready()?;
        let node = self.type_node(qualified_id)?;
        let file = self.store.file_path_of_node(node.id)?;
        Ok(TypeInfo {
            name: node.name,
            qualified_id: node.qualified_id,
            kind: node.kind.as_str().to_string(),
            language: node.language,
            file,
            start_line: node.start_line,
            end_line: node.end_line,
        })
    }

    /// Methods contained in a type; an empty list is a valid answer.
    pub fn methods_of(&self, type_qualified_id: &str) -> Result<Vec<MethodInfo>, QueryError> {
        self.ensure_ready()?;
        let node = self.type_node(type_qualified_id)?;
        let methods = self.store.contained_callables(node.id)?;
        Ok(methods
            .into_iter()
            .map(|m| MethodInfo {
                name: m.name,
                qualified_id: m.qualified_id,
                start_line: m.start_line,
                end_line: m.end_line,
            })
            .collect())
    }

    pub fn definition_location(&self, qualified_id: &str) -> Result<Location, QueryError> {
        self.ensure_ready()?;
        let node = self
            .store
            .get_node_by_qualified(self.project_id, qualified_id)?
            .ok_or_else(|| QueryError::NotFound(qualified_id.to_string()))?;

        if node.kind == NodeKind::File {
            return Ok(Location {
                file: node.qualified_id,
                start_line: node.start_line,
                end_line: node.end_line,
            });
        }
        match self.store.file_path_of_node(node.id)? {
            Some(file) => Ok(Location {
                file,
                start_line: node.start_line,
                end_line: node.end_line,
            }),
            // External modules exist as nodes but have no source here
            None => Err(QueryError::NotFound(format!(
                "no definition location for {qualified_id}"
            ))),
        }
    }

    /// Adjacency pairs of qualified ids. Call scope returns raw call
    /// edges; import scope composes module imports down to file-level
    /// dependencies.
    pub fn call_edges(&self, scope: CallScope) -> Result<Vec<(String, String)>, QueryError> {
        self.ensure_ready()?;
        let edges = match scope {
            CallScope::Calls => self
                .store
                .edges_of_kind(self.project_id, crate::storage::models::EdgeKind::Calls)?,
            CallScope::Imports => self.store.import_file_adjacency(self.project_id)?,
        };
        Ok(edges)
    }

    /// Run a caller-supplied statement; anything but a single read-only
    /// SELECT is rejected before it reaches the database.
    pub fn run_query(
        &self,
        sql: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, QueryError> {
        self.ensure_ready()?;
        let trimmed = sql.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Err(QueryError::Unsupported("empty statement".to_string()));
        }
        if trimmed.contains(';') {
            return Err(QueryError::Unsupported(
                "multiple statements are not allowed".to_string(),
            ));
        }
        let head = trimmed
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if head != "select" {
            return Err(QueryError::Unsupported(format!(
                "only SELECT statements are allowed, got '{head}'"
            )));
        }
        Ok(self.store.select_rows(trimmed, params)?)
    }

    fn type_node(&self, qualified_id: &str) -> Result<NodeRecord, QueryError> {
        let node = self
            .store
            .get_node_by_qualified(self.project_id, qualified_id)?
            .ok_or_else(|| QueryError::NotFound(qualified_id.to_string()))?;
        if !node.kind.is_type() {
            return Err(QueryError::NotFound(format!(
                "{qualified_id} is a {}, not a type",
                node.kind.as_str()
            )));
        }
        Ok(node)
    }
}
