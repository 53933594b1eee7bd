//! SQLite-backed graph store

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::models::{
    BuildStatus, EdgeKind, FileRecord, NodeKind, NodeRecord, ProjectRecord,
};
use super::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Embedded graph store keyed by project
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Initialize the schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                root_path TEXT NOT NULL UNIQUE,
                build_status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                language TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                parsed_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                UNIQUE(project_id, path)
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                file_id INTEGER,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                qualified_id TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                language TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE SET NULL,
                UNIQUE(project_id, qualified_id)
            );

            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE,
                UNIQUE(project_id, source_id, target_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_project ON nodes(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(file_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
            CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
            CREATE INDEX IF NOT EXISTS idx_edges_kind ON edges(kind);
            "#,
        )?;
        Ok(())
    }

    /// Run `f` inside a single transaction; rolled back on error.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ==================== Projects ====================

    /// Match-or-create a project by root path, resetting its build
    /// status to pending.
    pub fn upsert_project(&self, name: &str, root_path: &str) -> Result<i64> {
        if let Some(existing) = self.get_project_by_path(root_path)? {
            self.conn.execute(
                "UPDATE projects SET name = ?1, build_status = 'pending', updated_at = ?2 WHERE id = ?3",
                params![name, Utc::now().to_rfc3339(), existing.id],
            )?;
            return Ok(existing.id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (name, root_path, build_status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![name, root_path, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_project_by_path(&self, root_path: &str) -> Result<Option<ProjectRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, root_path, build_status, created_at, updated_at
                 FROM projects WHERE root_path = ?1",
                params![root_path],
                project_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, root_path, build_status, created_at, updated_at
                 FROM projects WHERE name = ?1",
                params![name],
                project_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, root_path, build_status, created_at, updated_at
             FROM projects ORDER BY name",
        )?;
        let rows = stmt.query_map([], project_from_row)?;
        collect(rows)
    }

    pub fn set_build_status(&self, project_id: i64, status: BuildStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET build_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), project_id],
        )?;
        Ok(())
    }

    pub fn build_status(&self, project_id: i64) -> Result<Option<BuildStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT build_status FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;

        match status {
            Some(s) => BuildStatus::parse(&s)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown build status '{s}'"))),
            None => Ok(None),
        }
    }

    // ==================== Files ====================

    pub fn get_file_by_path(&self, project_id: i64, path: &str) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT id, project_id, path, language, content_hash, parsed_at
                 FROM files WHERE project_id = ?1 AND path = ?2",
                params![project_id, path],
                file_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn insert_file(
        &self,
        project_id: i64,
        path: &str,
        language: &str,
        content_hash: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO files (project_id, path, language, content_hash, parsed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, path, language, content_hash, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_file_hash(&self, file_id: i64, content_hash: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET content_hash = ?1, parsed_at = ?2 WHERE id = ?3",
            params![content_hash, Utc::now().to_rfc3339(), file_id],
        )?;
        Ok(())
    }

    /// Delete entity nodes attached to a file, keeping the file node
    /// itself (identified by its path-valued qualified id).
    pub fn delete_file_entities(&self, file_id: i64, file_path: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM nodes WHERE file_id = ?1 AND qualified_id <> ?2",
            params![file_id, file_path],
        )?;
        Ok(n)
    }

    pub fn count_nodes_for_file(&self, file_id: i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // ==================== Nodes ====================

    /// Match-or-create a node by qualified id. Returns the node id and
    /// whether the node was newly created.
    pub fn upsert_node(&self, node: &NodeRecord) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM nodes WHERE project_id = ?1 AND qualified_id = ?2",
                params![node.project_id, node.qualified_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE nodes SET file_id = ?1, kind = ?2, name = ?3,
                 start_line = ?4, end_line = ?5, language = ?6 WHERE id = ?7",
                params![
                    node.file_id,
                    node.kind.as_str(),
                    node.name,
                    node.start_line,
                    node.end_line,
                    node.language,
                    id
                ],
            )?;
            return Ok((id, false));
        }

        self.conn.execute(
            "INSERT INTO nodes (project_id, file_id, kind, name, qualified_id,
                                start_line, end_line, language)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.project_id,
                node.file_id,
                node.kind.as_str(),
                node.name,
                node.qualified_id,
                node.start_line,
                node.end_line,
                node.language
            ],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn get_node_by_qualified(
        &self,
        project_id: i64,
        qualified_id: &str,
    ) -> Result<Option<NodeRecord>> {
        self.conn
            .query_row(
                &format!("{NODE_COLUMNS} WHERE project_id = ?1 AND qualified_id = ?2"),
                params![project_id, qualified_id],
                node_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Resolve a bare name to a definition node. Exact qualified id
    /// wins; otherwise the match is by simple name over the given
    /// kinds, preferring the originating file, then the smallest
    /// qualified id so resolution is deterministic.
    pub fn resolve_name(
        &self,
        project_id: i64,
        name: &str,
        kinds: &[NodeKind],
        prefer_file: Option<i64>,
    ) -> Result<Option<NodeRecord>> {
        if let Some(node) = self.get_node_by_qualified(project_id, name)? {
            return Ok(Some(node));
        }

        let kind_list = kinds
            .iter()
            .map(|k| format!("'{}'", k.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{NODE_COLUMNS}
             WHERE project_id = ?1 AND name = ?2 AND kind IN ({kind_list})
             ORDER BY (file_id IS NOT ?3), qualified_id
             LIMIT 1"
        );
        self.conn
            .query_row(&sql, params![project_id, name, prefer_file], node_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn nodes_of_kinds(&self, project_id: i64, kinds: &[NodeKind]) -> Result<Vec<NodeRecord>> {
        let kind_list = kinds
            .iter()
            .map(|k| format!("'{}'", k.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{NODE_COLUMNS} WHERE project_id = ?1 AND kind IN ({kind_list}) ORDER BY qualified_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], node_from_row)?;
        collect(rows)
    }

    /// Nodes of the given kinds with no inbound calls, extends or
    /// implements edge.
    pub fn unreferenced_nodes(
        &self,
        project_id: i64,
        kinds: &[NodeKind],
    ) -> Result<Vec<NodeRecord>> {
        let kind_list = kinds
            .iter()
            .map(|k| format!("'{}'", k.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{NODE_COLUMNS}
             WHERE project_id = ?1 AND kind IN ({kind_list})
               AND id NOT IN (
                   SELECT target_id FROM edges
                   WHERE project_id = ?1 AND kind IN ('calls', 'extends', 'implements')
               )
             ORDER BY qualified_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], node_from_row)?;
        collect(rows)
    }

    pub fn file_path_of_node(&self, node_id: i64) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT f.path FROM nodes n JOIN files f ON n.file_id = f.id WHERE n.id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    // ==================== Edges ====================

    /// Idempotent edge insert. Returns true when the edge is new.
    pub fn insert_edge(
        &self,
        project_id: i64,
        source_id: i64,
        target_id: i64,
        kind: EdgeKind,
    ) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO edges (project_id, source_id, target_id, kind)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, source_id, target_id, kind.as_str()],
        )?;
        Ok(n == 1)
    }

    /// All edges of one kind as (source, target) qualified-id pairs.
    pub fn edges_of_kind(
        &self,
        project_id: i64,
        kind: EdgeKind,
    ) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.qualified_id, t.qualified_id
             FROM edges e
             JOIN nodes s ON e.source_id = s.id
             JOIN nodes t ON e.target_id = t.id
             WHERE e.project_id = ?1 AND e.kind = ?2
             ORDER BY s.qualified_id, t.qualified_id",
        )?;
        let rows = stmt.query_map(params![project_id, kind.as_str()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        collect(rows)
    }

    /// Import edges composed to file-to-file adjacency: the importing
    /// file paired with the file whose defines edge declares the
    /// imported module. Imports of external modules have no defining
    /// file and are left out.
    pub fn import_file_adjacency(&self, project_id: i64) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT s.qualified_id, df.qualified_id
             FROM edges e
             JOIN nodes s ON e.source_id = s.id
             JOIN edges d ON d.target_id = e.target_id
                         AND d.kind = 'defines' AND d.project_id = e.project_id
             JOIN nodes df ON d.source_id = df.id AND df.kind = 'file'
             WHERE e.project_id = ?1 AND e.kind = 'imports'
             ORDER BY s.qualified_id, df.qualified_id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        collect(rows)
    }

    /// The file node that declares the given node via a defines edge.
    pub fn defining_file_node(&self, project_id: i64, node_id: i64) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT s.qualified_id
                 FROM edges e JOIN nodes s ON e.source_id = s.id
                 WHERE e.project_id = ?1 AND e.target_id = ?2 AND e.kind = 'defines'
                   AND s.kind = 'file'
                 LIMIT 1",
                params![project_id, node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Callable nodes contained in the given node.
    pub fn contained_callables(&self, parent_id: i64) -> Result<Vec<NodeRecord>> {
        let sql = format!(
            "SELECT n.id, n.project_id, n.file_id, n.kind, n.name, n.qualified_id,
                    n.start_line, n.end_line, n.language
             FROM nodes n
             JOIN edges e ON e.target_id = n.id
             WHERE e.source_id = ?1 AND e.kind = 'contains'
               AND n.kind IN ('method', 'function')
             ORDER BY n.start_line"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![parent_id], node_from_row)?;
        collect(rows)
    }

    pub fn callers_of(&self, node_id: i64) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT n.id, n.project_id, n.file_id, n.kind, n.name, n.qualified_id,
                    n.start_line, n.end_line, n.language
             FROM nodes n
             JOIN edges e ON e.source_id = n.id
             WHERE e.target_id = ?1 AND e.kind = 'calls'
             ORDER BY n.qualified_id",
        )?;
        let rows = stmt.query_map(params![node_id], node_from_row)?;
        collect(rows)
    }

    pub fn callees_of(&self, node_id: i64) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT n.id, n.project_id, n.file_id, n.kind, n.name, n.qualified_id,
                    n.start_line, n.end_line, n.language
             FROM nodes n
             JOIN edges e ON e.target_id = n.id
             WHERE e.source_id = ?1 AND e.kind = 'calls'
             ORDER BY n.qualified_id",
        )?;
        let rows = stmt.query_map(params![node_id], node_from_row)?;
        collect(rows)
    }

    /// Number of inbound contains edges, used by invariant checks.
    pub fn containment_parents(&self, node_id: i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE target_id = ?1 AND kind = 'contains'",
            params![node_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // ==================== Stats / raw access ====================

    pub fn count_nodes(&self, project_id: i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn count_edges(&self, project_id: i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn count_files(&self, project_id: i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Fault injection for store-failure tests.
    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Execute a caller-supplied SELECT and return rows as JSON maps.
    /// Statement validation (read-only enforcement) lives in the query
    /// layer; this is the raw execution path.
    pub fn select_rows(
        &self,
        sql: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = serde_json::Map::new();
            for (i, col) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::from(v),
                    ValueRef::Real(v) => Value::from(v),
                    ValueRef::Text(v) => Value::from(String::from_utf8_lossy(v).into_owned()),
                    ValueRef::Blob(v) => Value::from(format!("<blob {} bytes>", v.len())),
                };
                record.insert(col.clone(), value);
            }
            out.push(record);
        }
        Ok(out)
    }
}

const NODE_COLUMNS: &str = "SELECT id, project_id, file_id, kind, name, qualified_id,
                            start_line, end_line, language FROM nodes";

fn project_from_row(row: &Row) -> rusqlite::Result<ProjectRecord> {
    let status: String = row.get(3)?;
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        build_status: BuildStatus::parse(&status).unwrap_or(BuildStatus::Failed),
        created_at: parse_ts(4, row.get(4)?)?,
        updated_at: parse_ts(5, row.get(5)?)?,
    })
}

fn file_from_row(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        path: row.get(2)?,
        language: row.get(3)?,
        content_hash: row.get(4)?,
        parsed_at: parse_ts(5, row.get(5)?)?,
    })
}

fn node_from_row(row: &Row) -> rusqlite::Result<NodeRecord> {
    let kind: String = row.get(3)?;
    let kind = NodeKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown node kind '{kind}'").into(),
        )
    })?;
    Ok(NodeRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_id: row.get(2)?,
        kind,
        name: row.get(4)?,
        qualified_id: row.get(5)?,
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        language: row.get(8)?,
    })
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
