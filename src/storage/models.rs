//! Data models for the code knowledge graph storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Module,
    Class,
    Interface,
    Struct,
    Function,
    Method,
    Field,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Struct => "struct",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Field => "field",
        }
    }

    pub fn parse(s: &str) -> Option<NodeKind> {
        match s {
            "file" => Some(NodeKind::File),
            "module" => Some(NodeKind::Module),
            "class" => Some(NodeKind::Class),
            "interface" => Some(NodeKind::Interface),
            "struct" => Some(NodeKind::Struct),
            "function" => Some(NodeKind::Function),
            "method" => Some(NodeKind::Method),
            "field" => Some(NodeKind::Field),
            _ => None,
        }
    }

    /// Kinds that declare a type
    pub fn is_type(&self) -> bool {
        matches!(self, NodeKind::Class | NodeKind::Interface | NodeKind::Struct)
    }

    /// Kinds that declare a callable
    pub fn is_callable(&self) -> bool {
        matches!(self, NodeKind::Function | NodeKind::Method)
    }
}

/// Kind of a directed graph edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Contains,
    Defines,
    Extends,
    Implements,
    Calls,
    Imports,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::Defines => "defines",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeKind> {
        match s {
            "contains" => Some(EdgeKind::Contains),
            "defines" => Some(EdgeKind::Defines),
            "extends" => Some(EdgeKind::Extends),
            "implements" => Some(EdgeKind::Implements),
            "calls" => Some(EdgeKind::Calls),
            "imports" => Some(EdgeKind::Imports),
            _ => None,
        }
    }
}

/// Build lifecycle state of a project scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Complete,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Complete => "complete",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<BuildStatus> {
        match s {
            "pending" => Some(BuildStatus::Pending),
            "complete" => Some(BuildStatus::Complete),
            "failed" => Some(BuildStatus::Failed),
            _ => None,
        }
    }
}

/// Project record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub build_status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// File record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub project_id: i64,
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub parsed_at: DateTime<Utc>,
}

/// Node record in the database
///
/// `file_id` is NULL for nodes with no defining file in the project,
/// e.g. modules referenced by an import but defined elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub project_id: i64,
    pub file_id: Option<i64>,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_id: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
}

/// Edge record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: i64,
    pub project_id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub kind: EdgeKind,
}

/// Code entity extracted by a language plugin (before storage)
///
/// `dotted` is the fully-qualified dotted name within the file's
/// namespace; `parent` is the dotted name of the enclosing entity, or
/// None for top-level entities (which attach directly under the file).
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: NodeKind,
    pub name: String,
    pub dotted: String,
    pub parent: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
}

/// Kind of an extracted relation (structural containment is implied by
/// `Entity::parent` and is not expressed here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Extends,
    Implements,
    Calls,
    Imports,
}

impl RelationKind {
    pub fn edge_kind(&self) -> EdgeKind {
        match self {
            RelationKind::Extends => EdgeKind::Extends,
            RelationKind::Implements => EdgeKind::Implements,
            RelationKind::Calls => EdgeKind::Calls,
            RelationKind::Imports => EdgeKind::Imports,
        }
    }
}

/// Relation extracted by a language plugin (before resolution)
///
/// `from` is the dotted name of the originating entity, or None when
/// the relation originates at the file itself (imports). `target` is a
/// name that may need cross-file resolution: a module path for imports,
/// a type or callee name otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub from: Option<String>,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_round_trips_through_str() {
        for kind in [
            NodeKind::File,
            NodeKind::Module,
            NodeKind::Class,
            NodeKind::Interface,
            NodeKind::Struct,
            NodeKind::Function,
            NodeKind::Method,
            NodeKind::Field,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("widget"), None);
    }

    #[test]
    fn edge_kind_round_trips_through_str() {
        for kind in [
            EdgeKind::Contains,
            EdgeKind::Defines,
            EdgeKind::Extends,
            EdgeKind::Implements,
            EdgeKind::Calls,
            EdgeKind::Imports,
        ] {
            assert_eq!(EdgeKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn build_status_parse() {
        assert_eq!(BuildStatus::parse("pending"), Some(BuildStatus::Pending));
        assert_eq!(BuildStatus::parse("complete"), Some(BuildStatus::Complete));
        assert_eq!(BuildStatus::parse("failed"), Some(BuildStatus::Failed));
        assert_eq!(BuildStatus::parse("done"), None);
    }
}
