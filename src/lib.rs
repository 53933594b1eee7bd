//! ckgraph - Code knowledge graph construction and analysis
//!
//! This library ingests source repositories, builds a property graph of
//! files, types, functions and their relationships in SQLite, and runs
//! architectural and change-impact analyses over the stored graph.

pub mod analysis;
pub mod core;
pub mod languages;
pub mod storage;

pub use crate::analysis::{ArchitectureAnalyzer, ImpactAnalyzer};
pub use crate::core::builder::GraphBuilder;
pub use crate::core::config::Config;
pub use crate::core::coordinator::ParserCoordinator;
pub use crate::core::query::GraphQuery;
pub use crate::languages::LanguageRegistry;
pub use crate::storage::GraphStore;
