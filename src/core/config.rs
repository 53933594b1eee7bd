//! Configuration management for ckgraph

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the graph pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Build configuration
    pub build: BuildConfig,

    /// Analysis configuration
    pub analysis: AnalysisConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ckgraph.db"),
        }
    }
}

/// Graph build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Pending edges resolved per write transaction
    pub batch_size: usize,

    /// Retries per transaction on transient database errors
    pub max_retries: u32,

    /// Parallel parse workers
    pub parallelism: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retries: 3,
            parallelism: 8,
        }
    }
}

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Transitive caller depth for impact reports
    pub max_impact_depth: u32,

    /// Default cycle scope (calls or imports)
    pub cycle_scope: String,

    /// Names treated as entry points in addition to the per-language
    /// defaults
    pub extra_entry_points: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_impact_depth: 3,
            cycle_scope: "calls".to_string(),
            extra_entry_points: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.build.batch_size, 500);
        assert_eq!(config.analysis.max_impact_depth, 3);
        assert_eq!(config.analysis.cycle_scope, "calls");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [build]
            parallelism = 2

            [analysis]
            extra_entry_points = ["handler"]
            "#,
        )
        .unwrap();
        assert_eq!(config.build.parallelism, 2);
        assert_eq!(config.build.batch_size, 500);
        assert_eq!(config.analysis.extra_entry_points, vec!["handler"]);
        assert_eq!(config.database.path, PathBuf::from("ckgraph.db"));
    }
}
