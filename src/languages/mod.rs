//! Language support for code parsing
//!
//! One plugin per supported language: each turns a parsed syntax tree
//! into normalized entities and relations. Dispatch happens through a
//! static registry keyed by language id and file extension.

pub mod go;
pub mod java;
pub mod python;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tree_sitter::Tree;

use crate::storage::models::{Entity, Relation};

/// Capability contract implemented per language
pub trait LanguageSupport: Send + Sync {
    /// Language identifier (e.g. "python", "java", "go")
    fn language_id(&self) -> &'static str;

    /// Supported file extensions (e.g. [".py"])
    fn file_extensions(&self) -> &[&str];

    /// Tree-sitter grammar for this language
    fn grammar(&self) -> tree_sitter::Language;

    /// Names recognized as entry points for unused-code analysis
    fn entry_point_names(&self) -> &[&str];

    /// Extract entities and relations from a parsed file.
    /// `rel_path` is the project-relative path, used to derive the
    /// module name where the language ties modules to file layout.
    fn extract(&self, source: &str, tree: &Tree, rel_path: &str)
        -> Result<(Vec<Entity>, Vec<Relation>)>;
}

/// Registry of language plugins, keyed by id and file extension
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn LanguageSupport>>,
    extension_map: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Registry with the built-in languages
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(python::PythonLanguage::new()));
        registry.register(Arc::new(java::JavaLanguage::new()));
        registry.register(Arc::new(go::GoLanguage::new()));
        registry
    }

    pub fn empty() -> Self {
        Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        }
    }

    pub fn register(&mut self, language: Arc<dyn LanguageSupport>) {
        let id = language.language_id().to_string();
        for ext in language.file_extensions() {
            self.extension_map.insert(ext.to_string(), id.clone());
        }
        self.languages.insert(id, language);
    }

    pub fn get(&self, language_id: &str) -> Option<Arc<dyn LanguageSupport>> {
        self.languages.get(language_id).cloned()
    }

    pub fn get_by_extension(&self, extension: &str) -> Option<Arc<dyn LanguageSupport>> {
        let ext = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{extension}")
        };
        self.extension_map
            .get(&ext)
            .and_then(|id| self.languages.get(id))
            .cloned()
    }

    pub fn language_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn list_languages(&self) -> Vec<Arc<dyn LanguageSupport>> {
        let mut all: Vec<_> = self.languages.values().cloned().collect();
        all.sort_by_key(|l| l.language_id());
        all
    }

    /// Entry-point names from every registered plugin, for the
    /// unused-code analyzer.
    pub fn entry_point_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .languages
            .values()
            .flat_map(|l| l.entry_point_names().iter().map(|s| s.to_string()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse source with the plugin's grammar and run its extractor.
pub fn parse_source(
    language: &Arc<dyn LanguageSupport>,
    source: &str,
    rel_path: &str,
) -> Result<(Vec<Entity>, Vec<Relation>)> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| anyhow::anyhow!("failed to load {} grammar: {e}", language.language_id()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("parser produced no tree for {rel_path}"))?;
    if tree.root_node().has_error() {
        anyhow::bail!("syntax errors in {rel_path}");
    }
    language.extract(source, &tree, rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_has_no_languages() {
        let registry = LanguageRegistry::empty();
        assert!(registry.language_ids().is_empty());
    }

    #[test]
    fn default_registry_registers_builtins() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.language_ids(), vec!["go", "java", "python"]);
    }

    #[test]
    fn extension_lookup_with_and_without_dot() {
        let registry = LanguageRegistry::new();
        assert_eq!(
            registry.get_by_extension("py").map(|l| l.language_id()),
            Some("python")
        );
        assert_eq!(
            registry.get_by_extension(".java").map(|l| l.language_id()),
            Some("java")
        );
        assert!(registry.get_by_extension(".rb").is_none());
    }

    #[test]
    fn entry_points_are_collected_across_plugins() {
        let registry = LanguageRegistry::new();
        let names = registry.entry_point_names();
        assert!(names.contains(&"main".to_string()));
        assert!(names.contains(&"init".to_string()));
    }
}
