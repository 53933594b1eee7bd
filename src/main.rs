//! ckgraph - Code knowledge graph builder and analyzer
//!
//! A command-line tool for ingesting code repositories into a
//! queryable knowledge graph with support for multiple programming
//! languages.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use ckgraph::analysis::{ArchitectureAnalyzer, ImpactAnalyzer};
use ckgraph::core::query::{CallScope, GraphQuery};
use ckgraph::core::{scan_project, Config};
use ckgraph::languages::LanguageRegistry;
use ckgraph::storage::GraphStore;

/// ckgraph - Code knowledge graph builder and analyzer
#[derive(Parser)]
#[command(name = "ckgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to SQLite database file (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project and build its knowledge graph
    Scan {
        /// Path to the project root
        #[arg(short, long)]
        path: PathBuf,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Languages to include (all supported if not specified)
        #[arg(short, long)]
        languages: Option<Vec<String>>,
    },

    /// Query the knowledge graph
    Query {
        /// Project name or ID to query
        #[arg(short, long)]
        project: Option<String>,

        #[command(subcommand)]
        query_type: QueryCommands,
    },

    /// Run architectural analyses
    Analyze {
        /// Project name or ID to analyze
        #[arg(short, long)]
        project: Option<String>,

        #[command(subcommand)]
        check: AnalyzeCommands,
    },

    /// Report the impact of changed entities
    Impact {
        /// Project name or ID to analyze
        #[arg(short, long)]
        project: Option<String>,

        /// Transitive caller depth
        #[arg(long)]
        depth: Option<u32>,

        /// Qualified identifiers changed by the patch
        #[arg(required = true)]
        changed: Vec<String>,
    },

    /// List all projects
    Projects,

    /// List supported languages
    Languages,
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Look up a type by its qualified identifier
    Type {
        /// Qualified identifier (e.g. src/a.py::Foo)
        #[arg(short, long)]
        id: String,
    },

    /// List the methods of a type
    Methods {
        /// Qualified identifier of the type
        #[arg(short, long)]
        id: String,
    },

    /// Show where an entity is defined
    Definition {
        /// Qualified identifier of the entity
        #[arg(short, long)]
        id: String,
    },

    /// Dump call or import adjacency
    Calls {
        /// Edge scope: calls or imports
        #[arg(short, long, default_value = "calls")]
        scope: String,
    },

    /// Run a read-only SELECT against the graph tables
    Sql {
        /// The SELECT statement
        statement: String,
    },
}

#[derive(Subcommand)]
enum AnalyzeCommands {
    /// Detect dependency cycles
    Cycles {
        /// Edge scope: calls or imports
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// Find entities with no inbound references
    Unused,
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        "ckgraph=debug".to_string()
    } else {
        format!("ckgraph={level}")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    Ok(config)
}

/// Resolve project name/id to project_id
fn resolve_project(store: &GraphStore, project: Option<&str>) -> anyhow::Result<i64> {
    match project {
        Some(p) => {
            if let Ok(id) = p.parse::<i64>() {
                return Ok(id);
            }
            store
                .get_project_by_name(p)?
                .map(|proj| proj.id)
                .ok_or_else(|| anyhow::anyhow!("Project '{}' not found", p))
        }
        None => {
            let projects = store.list_projects()?;
            if projects.is_empty() {
                anyhow::bail!("No projects found. Use 'ckgraph scan' to create one.");
            }
            if projects.len() > 1 {
                eprintln!("Multiple projects found. Use --project to specify one:");
                for p in &projects {
                    eprintln!("  - {} (id={})", p.name, p.id);
                }
                anyhow::bail!("Please specify a project with --project <name|id>");
            }
            Ok(projects[0].id)
        }
    }
}

fn parse_scope(scope: &str) -> anyhow::Result<CallScope> {
    CallScope::parse(scope)
        .ok_or_else(|| anyhow::anyhow!("Unknown scope '{}', expected 'calls' or 'imports'", scope))
}

/// Cancellation flag flipped by Ctrl-C; checked at file and batch
/// boundaries during a scan.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Scan {
            path,
            name,
            languages,
        } => {
            let project_name = name.unwrap_or_else(|| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unnamed")
                    .to_string()
            });

            info!("Scanning project '{}' at {:?}", project_name, path);
            let cancel = cancel_on_ctrl_c();
            let result =
                scan_project(&config, &project_name, &path, languages.as_deref(), cancel).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Query {
            project,
            query_type,
        } => {
            let store = GraphStore::open(&config.database.path)?;
            let project_id = resolve_project(&store, project.as_deref())?;
            let query = GraphQuery::new(&store, project_id);

            match query_type {
                QueryCommands::Type { id } => {
                    println!("{}", serde_json::to_string_pretty(&query.find_type(&id)?)?);
                }
                QueryCommands::Methods { id } => {
                    println!("{}", serde_json::to_string_pretty(&query.methods_of(&id)?)?);
                }
                QueryCommands::Definition { id } => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&query.definition_location(&id)?)?
                    );
                }
                QueryCommands::Calls { scope } => {
                    let edges = query.call_edges(parse_scope(&scope)?)?;
                    println!("{}", serde_json::to_string_pretty(&edges)?);
                }
                QueryCommands::Sql { statement } => {
                    let rows = query.run_query(&statement, &[])?;
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }

        Commands::Analyze { project, check } => {
            let store = GraphStore::open(&config.database.path)?;
            let project_id = resolve_project(&store, project.as_deref())?;
            let analyzer = ArchitectureAnalyzer::new(&store, project_id);

            let findings = match check {
                AnalyzeCommands::Cycles { scope } => {
                    let scope = scope.unwrap_or_else(|| config.analysis.cycle_scope.clone());
                    analyzer.detect_cycles(parse_scope(&scope)?)?
                }
                AnalyzeCommands::Unused => {
                    let mut entry_points = LanguageRegistry::new().entry_point_names();
                    entry_points.extend(config.analysis.extra_entry_points.iter().cloned());
                    analyzer.find_unused(&entry_points)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&findings)?);
        }

        Commands::Impact {
            project,
            depth,
            changed,
        } => {
            let store = GraphStore::open(&config.database.path)?;
            let project_id = resolve_project(&store, project.as_deref())?;
            let depth = depth.unwrap_or(config.analysis.max_impact_depth);
            let analyzer = ImpactAnalyzer::new(&store, project_id, depth);
            let report = analyzer.analyze(&changed)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Projects => {
            let store = GraphStore::open(&config.database.path)?;
            let projects = store.list_projects()?;

            if projects.is_empty() {
                println!("No projects found.");
            } else {
                println!("Projects:");
                for p in projects {
                    println!(
                        "  - {} (id={}, path={}, status={})",
                        p.name,
                        p.id,
                        p.root_path,
                        p.build_status.as_str()
                    );
                }
            }
        }

        Commands::Languages => {
            let registry = LanguageRegistry::new();
            println!("Supported languages:");
            for lang in registry.list_languages() {
                println!(
                    "  - {} (extensions: {})",
                    lang.language_id(),
                    lang.file_extensions().join(", ")
                );
            }
        }
    }

    Ok(())
}
