//! Graph builder
//!
//! Maps a parse report onto the property-graph schema with idempotent
//! upsert-by-qualified-id writes. Pass 1 merges nodes and structural
//! edges one file-transaction at a time; relations whose target is not
//! known intra-file go into a pending-edge queue that pass 2 drains in
//! batches once every node exists. References still unresolved after
//! pass 2 are reported and logged, never dropped silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::coordinator::{FileParse, ParseReport};
use crate::storage::models::{
    BuildStatus, EdgeKind, Entity, NodeKind, NodeRecord, RelationKind,
};
use crate::storage::{GraphStore, StoreError};

const TYPE_KINDS: &[NodeKind] = &[NodeKind::Class, NodeKind::Interface, NodeKind::Struct];
const CALLABLE_KINDS: &[NodeKind] = &[NodeKind::Function, NodeKind::Method];
const IMPORT_KINDS: &[NodeKind] = &[
    NodeKind::Module,
    NodeKind::Class,
    NodeKind::Interface,
    NodeKind::Struct,
];

/// A reference whose target never materialized during the build
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedRef {
    pub from: String,
    pub kind: String,
    pub target: String,
}

/// Structured outcome of one build; returned even on partial failure.
#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub project_id: i64,
    pub status: BuildStatus,
    pub files_processed: u64,
    pub entities_found: u64,
    pub relationships_found: u64,
    pub nodes_created: u64,
    pub nodes_matched: u64,
    pub relationships_created: u64,
    pub failed_batches: u64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub unresolved: Vec<UnresolvedRef>,
}

/// An edge waiting for cross-file resolution
#[derive(Debug)]
struct PendingEdge {
    source_id: i64,
    source_qid: String,
    kind: RelationKind,
    target: String,
    file_id: i64,
}

#[derive(Default)]
struct FileMerge {
    nodes_created: u64,
    nodes_matched: u64,
    edges_created: u64,
    pending: Vec<PendingEdge>,
}

/// Builder for constructing and storing the knowledge graph
pub struct GraphBuilder {
    store: GraphStore,
    batch_size: usize,
    max_retries: u32,
}

impl GraphBuilder {
    pub fn new(store: GraphStore, batch_size: usize, max_retries: u32) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            max_retries,
        }
    }

    /// Hand the underlying store back, e.g. for post-build queries.
    pub fn into_store(self) -> GraphStore {
        self.store
    }

    /// Build the graph for one parse report. Per-file and per-batch
    /// failures are absorbed into the result; only store-level faults
    /// at the project boundary propagate as errors.
    pub fn build(
        &self,
        project_name: &str,
        report: &ParseReport,
        cancel: &Arc<AtomicBool>,
    ) -> Result<BuildResult, StoreError> {
        let started = Instant::now();
        let root = report.root.to_string_lossy().to_string();
        let project_id = self.store.upsert_project(project_name, &root)?;

        info!(project = project_name, project_id, "building graph");

        let mut result = BuildResult {
            project_id,
            status: BuildStatus::Pending,
            files_processed: 0,
            entities_found: report.entities_found,
            relationships_found: report.relations_found,
            nodes_created: 0,
            nodes_matched: 0,
            relationships_created: 0,
            failed_batches: 0,
            duration_ms: 0,
            errors: report
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.path, e.message))
                .collect(),
            unresolved: Vec::new(),
        };

        let mut pending: Vec<PendingEdge> = Vec::new();
        let mut cancelled = false;
        let mut merge_failures = 0u64;

        // Pass 1: nodes and structural edges, one transaction per file
        for parse in &report.parses {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                result.errors.push("build cancelled at file boundary".to_string());
                break;
            }

            let merged = self.with_retries(|| {
                self.store
                    .in_transaction(|db| merge_file(db, project_id, parse))
            });
            match merged {
                Ok(merge) => {
                    result.files_processed += 1;
                    result.nodes_created += merge.nodes_created;
                    result.nodes_matched += merge.nodes_matched;
                    result.relationships_created += merge.edges_created;
                    pending.extend(merge.pending);
                }
                Err(e) => {
                    merge_failures += 1;
                    result.failed_batches += 1;
                    result.errors.push(format!("{}: {}", parse.rel_path, e));
                }
            }
        }

        // Pass 2: drain the pending-edge queue now that all nodes exist
        if !cancelled {
            for batch in pending.chunks(self.batch_size) {
                if cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    result.errors.push("build cancelled at batch boundary".to_string());
                    break;
                }

                let resolved = self.with_retries(|| {
                    self.store
                        .in_transaction(|db| resolve_batch(db, project_id, batch))
                });
                match resolved {
                    Ok(outcome) => {
                        result.relationships_created += outcome.edges_created;
                        result.nodes_created += outcome.nodes_created;
                        result.unresolved.extend(outcome.unresolved);
                    }
                    Err(e) => {
                        result.failed_batches += 1;
                        result.errors.push(format!("edge batch failed: {e}"));
                    }
                }
            }
        }

        for unresolved in &result.unresolved {
            warn!(
                from = %unresolved.from,
                target = %unresolved.target,
                kind = %unresolved.kind,
                "reference left unresolved"
            );
        }

        // A file whose merge never landed leaves the graph incomplete;
        // pass-2 batch failures only degrade it to partial success
        result.status = if cancelled || merge_failures > 0 {
            BuildStatus::Failed
        } else {
            BuildStatus::Complete
        };
        self.store.set_build_status(project_id, result.status)?;
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            project_id,
            files = result.files_processed,
            nodes_created = result.nodes_created,
            nodes_matched = result.nodes_matched,
            edges = result.relationships_created,
            unresolved = result.unresolved.len(),
            "build finished with status {}",
            result.status.as_str()
        );

        Ok(result)
    }

    /// Retry transient store failures with exponential backoff.
    fn with_retries<T>(
        &self,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(25 * (1 << attempt.min(6)));
                    debug!(attempt, "transient store error, retrying: {e}");
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

struct ResolveOutcome {
    edges_created: u64,
    nodes_created: u64,
    unresolved: Vec<UnresolvedRef>,
}

/// Merge one file's entities and structural edges.
fn merge_file(
    store: &GraphStore,
    project_id: i64,
    parse: &FileParse,
) -> Result<FileMerge, StoreError> {
    let mut merge = FileMerge::default();

    let file_id = match store.get_file_by_path(project_id, &parse.rel_path)? {
        Some(existing) if existing.content_hash == parse.content_hash => {
            // Unchanged since the last scan: existing nodes stand in.
            // Edges into neighbors re-merged this scan were cascade-
            // deleted with the neighbor's stale nodes, so relations
            // still go back through pass 2.
            debug!(path = %parse.rel_path, "file unchanged, re-enqueueing relations only");
            merge.nodes_matched += store.count_nodes_for_file(existing.id)?;
            enqueue_existing_relations(store, project_id, parse, existing.id, &mut merge)?;
            return Ok(merge);
        }
        Some(existing) => {
            store.delete_file_entities(existing.id, &parse.rel_path)?;
            store.update_file_hash(existing.id, &parse.content_hash)?;
            existing.id
        }
        None => store.insert_file(
            project_id,
            &parse.rel_path,
            &parse.language,
            &parse.content_hash,
        )?,
    };

    let file_name = parse
        .rel_path
        .rsplit('/')
        .next()
        .unwrap_or(&parse.rel_path)
        .to_string();
    let end_line = parse.entities.iter().map(|e| e.end_line).max().unwrap_or(1);
    let (file_node, created) = store.upsert_node(&NodeRecord {
        id: 0,
        project_id,
        file_id: Some(file_id),
        kind: NodeKind::File,
        name: file_name,
        qualified_id: parse.rel_path.clone(),
        start_line: 1,
        end_line,
        language: parse.language.clone(),
    })?;
    if created {
        merge.nodes_created += 1;
    } else {
        merge.nodes_matched += 1;
    }

    // Entities arrive parents-first from the extractors
    let mut by_dotted: HashMap<&str, (i64, String)> = HashMap::new();
    for entity in &parse.entities {
        let qualified_id = entity_qualified_id(entity, &parse.rel_path);

        let (node_id, created) = store.upsert_node(&NodeRecord {
            id: 0,
            project_id,
            file_id: Some(file_id),
            kind: entity.kind,
            name: entity.name.clone(),
            qualified_id: qualified_id.clone(),
            start_line: entity.start_line,
            end_line: entity.end_line,
            language: parse.language.clone(),
        })?;
        if created {
            merge.nodes_created += 1;
        } else {
            merge.nodes_matched += 1;
        }
        by_dotted.insert(entity.dotted.as_str(), (node_id, qualified_id));

        // Exactly one containment parent per entity: the enclosing
        // entity, or the file node for top-level declarations
        let parent_id = entity
            .parent
            .as_deref()
            .and_then(|p| by_dotted.get(p).map(|(id, _)| *id))
            .unwrap_or(file_node);
        if store.insert_edge(project_id, parent_id, node_id, EdgeKind::Contains)? {
            merge.edges_created += 1;
        }

        // Top-level modules and types are also declared by the file
        if entity.parent.is_none()
            && (entity.kind == NodeKind::Module || entity.kind.is_type())
            && store.insert_edge(project_id, file_node, node_id, EdgeKind::Defines)?
        {
            merge.edges_created += 1;
        }
    }

    for relation in &parse.relations {
        let (source_id, source_qid) = match relation.from.as_deref().and_then(|d| by_dotted.get(d))
        {
            Some((id, qid)) => (*id, qid.clone()),
            None => (file_node, parse.rel_path.clone()),
        };

        // Imports always cross the file boundary; other relations
        // resolve intra-file when the target's dotted name is local
        if relation.kind != RelationKind::Imports {
            if let Some((target_id, _)) = by_dotted.get(relation.target.as_str()) {
                if store.insert_edge(project_id, source_id, *target_id, relation.kind.edge_kind())? {
                    merge.edges_created += 1;
                }
                continue;
            }
        }

        merge.pending.push(PendingEdge {
            source_id,
            source_qid,
            kind: relation.kind,
            target: relation.target.clone(),
            file_id,
        });
    }

    Ok(merge)
}

fn entity_qualified_id(entity: &Entity, rel_path: &str) -> String {
    if entity.kind == NodeKind::Module {
        entity.dotted.clone()
    } else {
        format!("{rel_path}::{}", entity.dotted)
    }
}

/// Re-enqueue an unchanged file's relations against its existing
/// nodes. Pass 2 re-inserts idempotently, restoring any edge a
/// neighbor's re-merge dropped.
fn enqueue_existing_relations(
    store: &GraphStore,
    project_id: i64,
    parse: &FileParse,
    file_id: i64,
    merge: &mut FileMerge,
) -> Result<(), StoreError> {
    let file_node = store
        .get_node_by_qualified(project_id, &parse.rel_path)?
        .map(|n| n.id);

    let mut by_dotted: HashMap<&str, (i64, String)> = HashMap::new();
    for entity in &parse.entities {
        let qualified_id = entity_qualified_id(entity, &parse.rel_path);
        if let Some(node) = store.get_node_by_qualified(project_id, &qualified_id)? {
            by_dotted.insert(entity.dotted.as_str(), (node.id, qualified_id));
        }
    }

    for relation in &parse.relations {
        let (source_id, source_qid) = match relation.from.as_deref().and_then(|d| by_dotted.get(d))
        {
            Some((id, qid)) => (*id, qid.clone()),
            None => match file_node {
                Some(id) => (id, parse.rel_path.clone()),
                None => continue,
            },
        };
        merge.pending.push(PendingEdge {
            source_id,
            source_qid,
            kind: relation.kind,
            target: relation.target.clone(),
            file_id,
        });
    }
    Ok(())
}

/// Resolve one batch of pending edges against the fully merged graph.
fn resolve_batch(
    store: &GraphStore,
    project_id: i64,
    batch: &[PendingEdge],
) -> Result<ResolveOutcome, StoreError> {
    let mut outcome = ResolveOutcome {
        edges_created: 0,
        nodes_created: 0,
        unresolved: Vec::new(),
    };

    for edge in batch {
        let target_id = match edge.kind {
            RelationKind::Imports => {
                resolve_import(store, project_id, edge, &mut outcome.nodes_created)?
            }
            RelationKind::Extends | RelationKind::Implements => store
                .resolve_name(project_id, &edge.target, TYPE_KINDS, Some(edge.file_id))?
                .map(|n| n.id),
            RelationKind::Calls => store
                .resolve_name(project_id, &edge.target, CALLABLE_KINDS, Some(edge.file_id))?
                .map(|n| n.id),
        };

        match target_id {
            Some(target_id) => {
                if store.insert_edge(project_id, edge.source_id, target_id, edge.kind.edge_kind())? {
                    outcome.edges_created += 1;
                }
            }
            None => outcome.unresolved.push(UnresolvedRef {
                from: edge.source_qid.clone(),
                kind: edge.kind.edge_kind().as_str().to_string(),
                target: edge.target.clone(),
            }),
        }
    }

    Ok(outcome)
}

/// Imports resolve to a project module/type when one matches; anything
/// else becomes an external module node so the dependency is kept.
fn resolve_import(
    store: &GraphStore,
    project_id: i64,
    edge: &PendingEdge,
    nodes_created: &mut u64,
) -> Result<Option<i64>, StoreError> {
    if let Some(node) =
        store.resolve_name(project_id, &edge.target, IMPORT_KINDS, Some(edge.file_id))?
    {
        return Ok(Some(node.id));
    }

    // Fall back to the last path segment (Go import paths, deep Java imports)
    let tail = edge
        .target
        .rsplit(['.', '/'])
        .next()
        .unwrap_or(&edge.target);
    if tail != edge.target {
        if let Some(node) = store.resolve_name(project_id, tail, IMPORT_KINDS, Some(edge.file_id))? {
            return Ok(Some(node.id));
        }
    }

    let (id, created) = store.upsert_node(&NodeRecord {
        id: 0,
        project_id,
        file_id: None,
        kind: NodeKind::Module,
        name: tail.to_string(),
        qualified_id: edge.target.clone(),
        start_line: 0,
        end_line: 0,
        language: String::new(),
    })?;
    if created {
        *nodes_created += 1;
    }
    Ok(Some(id))
}
