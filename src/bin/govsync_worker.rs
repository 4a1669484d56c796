//! govsync-worker: isolated alert worker
//!
//! Launched by the dispatcher once per fired alert. Reads the alert from
//! `GOVSYNC_TRIGGERED_ALERT`, runs its data queries, writes chart datasets,
//! summarizes and publishes. The exit status is informational only.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use govsync::alerts::{AlertHandler, AlertProcessor, TriggeredAlert};
use govsync::config::{Config, CORE_ID_ENV_VAR, TRIGGERED_ALERT_ENV_VAR};
use govsync::storage::init_database;
use govsync::utils::bootstrap::{config_path_from_env, init_tracing, load_dotenv, log_dotenv};

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let payload = std::env::var(TRIGGERED_ALERT_ENV_VAR)
        .map_err(|_| format!("{} is not set", TRIGGERED_ALERT_ENV_VAR))?;
    let alert = TriggeredAlert::from_json(&payload)?;
    let core_id = std::env::var(CORE_ID_ENV_VAR).unwrap_or_else(|_| "?".to_string());

    info!(alert = %alert.alert_name, core = %core_id, "Worker started");

    let config = Config::load(config_path_from_env().as_deref())?;
    let store = init_database(&config.database).await?;
    let processor = AlertProcessor::from_config(&config.alerts, Arc::clone(&store))?;

    processor.handle(alert).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_path = load_dotenv();
    init_tracing();
    log_dotenv(dotenv_path.as_deref());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Alert worker failed");
            ExitCode::FAILURE
        }
    }
}
