//! Parser coordinator
//!
//! Dispatches files to language plugins, aggregates per-file results
//! and errors, and produces one unified parse report per project scan.
//! File-level failures are collected, never fatal; only a missing root
//! or an empty file set aborts the scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::languages::{parse_source, LanguageRegistry, LanguageSupport};
use crate::storage::models::{Entity, Relation};

/// Fatal scan-level errors; per-file problems never surface here.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("project root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("no files of any supported language under {0}")]
    NoParseableFiles(PathBuf),

    #[error("scan cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parsed graph data for one file
#[derive(Debug, Clone)]
pub struct FileParse {
    pub rel_path: String,
    pub language: String,
    pub content_hash: String,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// A recoverable per-file failure
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub path: String,
    pub language: String,
    pub message: String,
}

/// Per-language aggregates
#[derive(Debug, Clone, Default, Serialize)]
pub struct LanguageStats {
    pub files_parsed: u64,
    pub entities: u64,
    pub relations: u64,
}

/// Unified result of one coordinated parse run
#[derive(Debug)]
pub struct ParseReport {
    pub root: PathBuf,
    pub files_attempted: u64,
    pub files_parsed: u64,
    pub entities_found: u64,
    pub relations_found: u64,
    pub per_language: BTreeMap<String, LanguageStats>,
    pub errors: Vec<FileError>,
    pub skipped: Vec<String>,
    pub parses: Vec<FileParse>,
}

/// Coordinates parallel parsing across language plugins
pub struct ParserCoordinator {
    registry: Arc<LanguageRegistry>,
    parallelism: usize,
}

impl ParserCoordinator {
    pub fn new(registry: Arc<LanguageRegistry>, parallelism: usize) -> Self {
        Self {
            registry,
            parallelism: parallelism.max(1),
        }
    }

    /// Walk the tree and classify files by extension. Files with no
    /// registered parser are returned separately as skipped, not as
    /// errors.
    pub fn collect_files(
        &self,
        root: &Path,
        filter_languages: Option<&[String]>,
    ) -> Result<(Vec<(PathBuf, String)>, Vec<String>), ScanError> {
        if !root.exists() {
            return Err(ScanError::RootNotFound(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut skipped = Vec::new();

        // The root itself may have a hidden-style name (temp dirs often
        // do); only entries below it are filtered
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Unreadable entries and broken links are per-entry
                // problems, not scan-level failures
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    if let Some(path) = e.path() {
                        skipped.push(rel_path(root, path));
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str());
            let language = ext.and_then(|e| self.registry.get_by_extension(e));
            match language {
                Some(lang) => {
                    let id = lang.language_id().to_string();
                    if let Some(filters) = filter_languages {
                        if !filters.contains(&id) {
                            skipped.push(rel_path(root, entry.path()));
                            continue;
                        }
                    }
                    files.push((entry.path().to_path_buf(), id));
                }
                None => skipped.push(rel_path(root, entry.path())),
            }
        }

        Ok((files, skipped))
    }

    /// Parse the given (path, language) pairs. Grouping is by language;
    /// within a group files parse in parallel up to the configured
    /// limit. The cancel flag is honored between files only.
    pub async fn parse_files(
        &self,
        root: &Path,
        files: Vec<(PathBuf, String)>,
        skipped: Vec<String>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<ParseReport, ScanError> {
        if !root.exists() {
            return Err(ScanError::RootNotFound(root.to_path_buf()));
        }
        if files.is_empty() {
            return Err(ScanError::NoParseableFiles(root.to_path_buf()));
        }

        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (path, language) in files {
            groups.entry(language).or_default().push(path);
        }

        let mut report = ParseReport {
            root: root.to_path_buf(),
            files_attempted: 0,
            files_parsed: 0,
            entities_found: 0,
            relations_found: 0,
            per_language: BTreeMap::new(),
            errors: Vec::new(),
            skipped,
            parses: Vec::new(),
        };

        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        for (language_id, paths) in groups {
            let Some(plugin) = self.registry.get(&language_id) else {
                // Unknown tag from an external detector: skipped, not an error
                for path in paths {
                    report.skipped.push(rel_path(root, &path));
                }
                continue;
            };

            debug!(language = %language_id, files = paths.len(), "dispatching parse group");

            let mut workers: JoinSet<Result<FileParse, FileError>> = JoinSet::new();
            for path in paths {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ScanError::Cancelled);
                }
                report.files_attempted += 1;

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::Worker(e.to_string()))?;
                let plugin = plugin.clone();
                let rel = rel_path(root, &path);
                workers.spawn_blocking(move || {
                    let _permit = permit;
                    parse_one(&plugin, &path, rel)
                });
            }

            while let Some(joined) = workers.join_next().await {
                let outcome = joined.map_err(|e| ScanError::Worker(e.to_string()))?;
                match outcome {
                    Ok(parse) => {
                        let stats = report.per_language.entry(parse.language.clone()).or_default();
                        stats.files_parsed += 1;
                        stats.entities += parse.entities.len() as u64;
                        stats.relations += parse.relations.len() as u64;
                        report.files_parsed += 1;
                        report.entities_found += parse.entities.len() as u64;
                        report.relations_found += parse.relations.len() as u64;
                        report.parses.push(parse);
                    }
                    Err(error) => {
                        warn!(path = %error.path, "parse failed: {}", error.message);
                        report.errors.push(error);
                    }
                }
            }
        }

        // Deterministic order for downstream building and tests
        report.parses.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        report.errors.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(report)
    }
}

fn parse_one(
    plugin: &Arc<dyn LanguageSupport>,
    path: &Path,
    rel: String,
) -> Result<FileParse, FileError> {
    let language = plugin.language_id().to_string();
    let fail = |message: String| FileError {
        path: rel.clone(),
        language: language.clone(),
        message,
    };

    // Bytes first so non-UTF-8 files degrade instead of erroring
    let bytes = std::fs::read(path).map_err(|e| fail(format!("read failed: {e}")))?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let content_hash = compute_hash(&content);

    let (entities, relations) =
        parse_source(plugin, &content, &rel).map_err(|e| fail(e.to_string()))?;

    Ok(FileParse {
        rel_path: rel,
        language,
        content_hash,
        entities,
        relations,
    })
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.') && s.len() > 1)
        .unwrap_or(false)
}

/// SHA-256 of the file content, hex-encoded
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn coordinator() -> ParserCoordinator {
        ParserCoordinator::new(Arc::new(LanguageRegistry::new()), 4)
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn collect_files_classifies_and_skips() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        write(&dir, "b.go", "package b\n");
        write(&dir, "notes.txt", "hello\n");

        let (files, skipped) = coordinator().collect_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(skipped, vec!["notes.txt"]);
    }

    #[test]
    fn dot_named_root_is_scanned() {
        let dir = tempfile::Builder::new()
            .prefix(".cache_dir")
            .tempdir()
            .unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let (files, _) = coordinator().collect_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn hidden_subdirectories_are_still_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        write(&dir, ".git/hook.py", "x = 1\n");

        let (files, _) = coordinator().collect_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("a.py"));
    }

    #[test]
    fn broken_symlink_does_not_abort_the_walk() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        std::os::unix::fs::symlink(dir.path().join("gone.py"), dir.path().join("dangling.py"))
            .unwrap();

        let (files, _) = coordinator().collect_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("a.py"));
    }

    #[test]
    fn collect_files_missing_root_is_fatal() {
        let err = coordinator()
            .collect_files(Path::new("/nonexistent/xyz"), None)
            .unwrap_err();
        assert!(matches!(err, ScanError::RootNotFound(_)));
    }

    #[test]
    fn collect_files_honors_language_filter() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");
        write(&dir, "b.go", "package b\n");

        let only_python = vec!["python".to_string()];
        let (files, skipped) = coordinator()
            .collect_files(dir.path(), Some(&only_python))
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, "python");
        assert_eq!(skipped, vec!["b.go"]);
    }

    #[tokio::test]
    async fn parse_files_aggregates_across_languages() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "def foo():\n    bar()\n");
        write(&dir, "util/b.go", "package util\n\nfunc Bar() {}\n");

        let coordinator = coordinator();
        let (files, skipped) = coordinator.collect_files(dir.path(), None).unwrap();
        let report = coordinator
            .parse_files(dir.path(), files, skipped, &no_cancel())
            .await
            .unwrap();

        assert_eq!(report.files_attempted, 2);
        assert_eq!(report.files_parsed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.per_language.len(), 2);
        assert!(report.per_language["python"].entities >= 2); // module + foo
        assert_eq!(report.parses[0].rel_path, "a.py");
    }

    #[tokio::test]
    async fn per_file_errors_do_not_abort_the_scan() {
        let dir = TempDir::new().unwrap();
        write(&dir, "good.py", "def foo():\n    pass\n");
        write(&dir, "bad.py", "def broken(:\n");

        let coordinator = coordinator();
        let (files, skipped) = coordinator.collect_files(dir.path(), None).unwrap();
        let report = coordinator
            .parse_files(dir.path(), files, skipped, &no_cancel())
            .await
            .unwrap();

        assert_eq!(report.files_attempted, 2);
        assert_eq!(report.files_parsed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "bad.py");
    }

    #[tokio::test]
    async fn empty_file_set_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = coordinator()
            .parse_files(dir.path(), Vec::new(), Vec::new(), &no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoParseableFiles(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_before_dispatch() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "x = 1\n");

        let coordinator = coordinator();
        let (files, skipped) = coordinator.collect_files(dir.path(), None).unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let err = coordinator
            .parse_files(dir.path(), files, skipped, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }
}
