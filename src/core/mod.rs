//! Core engine for graph construction and querying

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod query;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

pub use builder::{BuildResult, GraphBuilder};
pub use config::Config;
pub use coordinator::{ParseReport, ParserCoordinator, ScanError};
pub use query::{CallScope, GraphQuery, QueryError};

use crate::languages::LanguageRegistry;
use crate::storage::GraphStore;

/// Scan a project root and build its knowledge graph: collect files,
/// parse them in parallel, then merge the results into the store on a
/// blocking task.
pub async fn scan_project(
    config: &Config,
    project_name: &str,
    project_root: &Path,
    languages: Option<&[String]>,
    cancel: Arc<AtomicBool>,
) -> anyhow::Result<BuildResult> {
    let registry = Arc::new(LanguageRegistry::new());
    let coordinator = ParserCoordinator::new(registry, config.build.parallelism);

    let (files, skipped) = coordinator.collect_files(project_root, languages)?;
    info!(
        files = files.len(),
        skipped = skipped.len(),
        "collected files under {}",
        project_root.display()
    );

    let report = coordinator
        .parse_files(project_root, files, skipped, &cancel)
        .await?;

    let store = GraphStore::open(&config.database.path)?;
    store.init_schema()?;
    let builder = GraphBuilder::new(store, config.build.batch_size, config.build.max_retries);

    let name = project_name.to_string();
    let result = tokio::task::spawn_blocking(move || builder.build(&name, &report, &cancel))
        .await??;

    Ok(result)
}
