//! Storage layer for the code knowledge graph

pub mod models;
pub mod sqlite;

pub use sqlite::GraphStore;

use thiserror::Error;

/// Errors raised by the graph store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether a retry with backoff is worthwhile (lock contention,
    /// busy handler exhausted), as opposed to a persistent fault.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
