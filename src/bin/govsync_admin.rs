//! govsync-admin: registration CLI
//!
//! Creates and registers table update jobs, materialized views, and alerts,
//! lists the registry, and runs a single cycle on demand.
//!
//! ```text
//! govsync-admin table create votes \
//!     --query-file votes.sql --column vote_id:TEXT --column weight:NUMERIC \
//!     --primary-key vote_id --seed
//! govsync-admin view create proposal_totals --query-file totals.sql
//! govsync-admin alert create quorum_reached --predicate-file quorum.sql \
//!     --metadata-file quorum.json
//! govsync-admin list
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::error;

use govsync::config::Config;
use govsync::query::{FlipsideClient, PaginatedQueryClient};
use govsync::registry::{
    AlertDefinition, AlertMetadata, FilesystemRegistryStore, OrderedMap, TableUpdateJob,
    UpdateRegistry,
};
use govsync::services::{CycleKind, UpdateCycle, UpdateExecutor};
use govsync::storage::init_database;
use govsync::utils::bootstrap::{config_path_from_env, init_tracing, load_dotenv, log_dotenv};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(name = "govsync-admin", version, about = "Register tables, views and alerts")]
struct Cli {
    /// Configuration file (YAML).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Table update jobs.
    #[command(subcommand)]
    Table(TableCommand),
    /// Materialized views.
    #[command(subcommand)]
    View(ViewCommand),
    /// Alerts.
    #[command(subcommand)]
    Alert(AlertCommand),
    /// Show everything registered.
    List,
    /// Run one cycle now.
    RunOnce {
        /// Only evaluate alerts.
        #[arg(long)]
        alerts_only: bool,
    },
}

#[derive(Debug, Subcommand)]
enum TableCommand {
    /// Create the table, optionally seed it, and register its update job.
    Create {
        #[command(flatten)]
        job: TableArgs,
        /// Run the update query once and load the result.
        #[arg(long)]
        seed: bool,
    },
    /// Register an update job for an existing table.
    Register(TableArgs),
}

#[derive(Debug, Args)]
struct TableArgs {
    /// Table name.
    name: String,
    /// Update query text.
    #[arg(long, conflicts_with = "query_file", required_unless_present = "query_file")]
    query: Option<String>,
    /// File holding the update query.
    #[arg(long)]
    query_file: Option<PathBuf>,
    /// Column as `name:TYPE`, repeated in table order.
    #[arg(long = "column", value_parser = parse_column, required = true)]
    columns: Vec<(String, String)>,
    /// Primary key column.
    #[arg(long)]
    primary_key: String,
}

#[derive(Debug, Subcommand)]
enum ViewCommand {
    /// Create and populate the view, then register it.
    Create {
        /// View name.
        name: String,
        /// Defining query text.
        #[arg(long, conflicts_with = "query_file", required_unless_present = "query_file")]
        query: Option<String>,
        /// File holding the defining query.
        #[arg(long)]
        query_file: Option<PathBuf>,
    },
    /// Register an existing view for refresh.
    Register {
        /// View name.
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum AlertCommand {
    /// Register (or replace) an alert.
    Create {
        /// Alert name.
        name: String,
        /// File holding the predicate query.
        #[arg(long)]
        predicate_file: PathBuf,
        /// JSON file with `ai_prompt_info`, `twitter_prompt_info` and
        /// `additional_queries`.
        #[arg(long)]
        metadata_file: Option<PathBuf>,
    },
}

fn parse_column(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, ty)) if !name.trim().is_empty() && !ty.trim().is_empty() => {
            Ok((name.trim().to_string(), ty.trim().to_string()))
        }
        _ => Err(format!("expected name:TYPE, got '{}'", raw)),
    }
}

fn query_text(inline: Option<String>, file: Option<&Path>) -> CliResult<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err("a query or query file is required".into()),
    }
}

impl TableArgs {
    fn into_job(self) -> CliResult<TableUpdateJob> {
        let query = query_text(self.query, self.query_file.as_deref())?;
        let columns: OrderedMap<String> = self.columns.into_iter().collect();
        Ok(TableUpdateJob::new(self.name, query, columns, self.primary_key))
    }
}

async fn open_registry(config: &Config) -> CliResult<UpdateRegistry> {
    let store = FilesystemRegistryStore::new(config.registry.clone()).await?;
    Ok(UpdateRegistry::open(Arc::new(store)).await)
}

async fn table(config: &Config, command: TableCommand) -> CliResult {
    let mut registry = open_registry(config).await?;

    match command {
        TableCommand::Create { job, seed } => {
            let job = job.into_job()?;
            job.validate()?;

            let store = init_database(&config.database).await?;
            store.create_table(&job).await?;
            println!("Created table {}", job.table_name);

            if seed {
                let client = FlipsideClient::new(&config.query_service)?;
                let query = PaginatedQueryClient::new(Arc::new(client))
                    .with_page_size(config.query_service.page_size);
                let report = UpdateExecutor::new(query, store).run_table_job(&job).await;
                println!("Seeded {}: {:?}", job.table_name, report.outcome);
            }

            registry.register_table_update(job).await?;
        }
        TableCommand::Register(args) => {
            let job = args.into_job()?;
            let name = job.table_name.clone();
            registry.register_table_update(job).await?;
            println!("Registered table job {}", name);
        }
    }
    Ok(())
}

async fn view(config: &Config, command: ViewCommand) -> CliResult {
    let mut registry = open_registry(config).await?;

    let name = match command {
        ViewCommand::Create {
            name,
            query,
            query_file,
        } => {
            let query = query_text(query, query_file.as_deref())?;
            let store = init_database(&config.database).await?;
            store.create_materialized_view(&name, &query).await?;
            println!("Created materialized view {}", name);
            name
        }
        ViewCommand::Register { name } => name,
    };

    if registry.register_materialized_view(&name).await? {
        println!("Registered materialized view {}", name);
    } else {
        println!("Materialized view {} was already registered", name);
    }
    Ok(())
}

async fn alert(config: &Config, command: AlertCommand) -> CliResult {
    let mut registry = open_registry(config).await?;

    let AlertCommand::Create {
        name,
        predicate_file,
        metadata_file,
    } = command;

    let predicate = std::fs::read_to_string(&predicate_file)?;
    let metadata: AlertMetadata = match metadata_file {
        Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
        None => AlertMetadata::default(),
    };

    registry
        .register_alert(AlertDefinition::new(name.clone(), predicate, metadata))
        .await?;
    println!("Registered alert {}", name);
    Ok(())
}

async fn list(config: &Config) -> CliResult {
    let registry = open_registry(config).await?;

    println!("Table update jobs:");
    for job in registry.table_jobs() {
        let columns: Vec<String> = job
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", name, ty))
            .collect();
        println!(
            "  {} (primary key {}): {}",
            job.table_name,
            job.primary_key,
            columns.join(", ")
        );
    }

    println!("Materialized views:");
    for view in registry.materialized_views() {
        println!("  {}", view);
    }

    println!("Alerts:");
    for alert in registry.alerts() {
        println!(
            "  {} ({} additional queries)",
            alert.name,
            alert.metadata.additional_queries.len()
        );
    }
    Ok(())
}

async fn run_once(config: &Config, config_path: Option<&Path>, alerts_only: bool) -> CliResult {
    let mut cycle = UpdateCycle::from_config(config, config_path).await?;
    let kind = if alerts_only {
        CycleKind::AlertsOnly
    } else {
        CycleKind::Full
    };
    let report = cycle.run(kind).await;

    if let Some(updates) = &report.updates {
        println!(
            "Tables: {} ({} failed), views: {} ({} failed)",
            updates.jobs.len(),
            updates.jobs_failed(),
            updates.views.len(),
            updates.views_failed()
        );
    }
    println!(
        "Alerts fired: {:?}, suppressed: {:?}, failed: {:?}",
        report.fired, report.suppressed, report.failed_alerts
    );
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult {
    let dotenv_path = load_dotenv();
    init_tracing();
    log_dotenv(dotenv_path.as_deref());

    let cli = Cli::parse();
    let config_path = cli.config.or_else(config_path_from_env);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    match cli.command {
        Commands::Table(command) => table(&config, command).await,
        Commands::View(command) => view(&config, command).await,
        Commands::Alert(command) => alert(&config, command).await,
        Commands::List => list(&config).await,
        Commands::RunOnce { alerts_only } => {
            run_once(&config, config_path.as_deref(), alerts_only).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column() {
        assert_eq!(
            parse_column("vote_id:TEXT").unwrap(),
            ("vote_id".to_string(), "TEXT".to_string())
        );
        assert_eq!(
            parse_column("amount: NUMERIC(38, 18)").unwrap(),
            ("amount".to_string(), "NUMERIC(38, 18)".to_string())
        );
        assert!(parse_column("no_type").is_err());
        assert!(parse_column(":TEXT").is_err());
    }

    #[test]
    fn test_table_create_args() {
        let cli = Cli::parse_from([
            "govsync-admin",
            "table",
            "create",
            "votes",
            "--query",
            "SELECT * FROM votes",
            "--column",
            "vote_id:TEXT",
            "--column",
            "weight:REAL",
            "--primary-key",
            "vote_id",
            "--seed",
        ]);
        let Commands::Table(TableCommand::Create { job, seed }) = cli.command else {
            panic!("expected table create");
        };
        assert!(seed);
        let job = job.into_job().unwrap();
        assert_eq!(job.column_names().collect::<Vec<_>>(), vec!["vote_id", "weight"]);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_query_required() {
        let result = Cli::try_parse_from([
            "govsync-admin",
            "table",
            "register",
            "votes",
            "--column",
            "vote_id:TEXT",
            "--primary-key",
            "vote_id",
        ]);
        assert!(result.is_err());
    }
}
