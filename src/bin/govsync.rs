//! govsync: update cycle daemon
//!
//! Refreshes registered tables and materialized views from the query
//! service, evaluates alerts, and dispatches alert workers on a schedule.
//!
//! ## Configuration
//! ```yaml
//! database:
//!   type: postgres
//!   url: postgres://govsync@localhost/governance
//! query_service:
//!   base_url: https://api-v2.flipsidecrypto.xyz
//! dispatch:
//!   max_cores: 8
//!   mode: process
//! scheduler:
//!   daily_at: "00:00"
//!   alert_interval_secs: 3600
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use govsync::config::Config;
use govsync::services::{CycleKind, Scheduler, UpdateCycle};
use govsync::utils::bootstrap::{config_path_from_env, init_tracing, load_dotenv, log_dotenv};

#[derive(Debug, Parser)]
#[command(name = "govsync", version, about = "Governance data update and alert daemon")]
struct Args {
    /// Configuration file (YAML).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run one full cycle and exit.
    #[arg(long)]
    once: bool,

    /// With --once, skip table and view updates and only evaluate alerts.
    #[arg(long, requires = "once")]
    alerts_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_path = load_dotenv();
    init_tracing();
    log_dotenv(dotenv_path.as_deref());

    let args = Args::parse();
    let config_path = args.config.or_else(config_path_from_env);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        database = %config.database.database_type,
        max_cores = config.dispatch.max_cores,
        "Starting govsync"
    );

    let mut cycle = UpdateCycle::from_config(&config, config_path.as_deref()).await?;

    if args.once {
        let kind = if args.alerts_only {
            CycleKind::AlertsOnly
        } else {
            CycleKind::Full
        };
        let report = cycle.run(kind).await;
        info!(
            fired = report.fired.len(),
            dispatch_failures = report.dispatch_failures.len(),
            "Single cycle complete"
        );
        return Ok(());
    }

    let mut scheduler = Scheduler::new(&config.scheduler, cycle)?;
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("govsync stopped");
    Ok(())
}
