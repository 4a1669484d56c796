//! Bootstrap utilities for govsync binaries.
//!
//! Shared initialization code for the daemon, the alert worker and the admin CLI.

use std::path::{Path, PathBuf};

use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CONFIG_ENV_VAR, LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the GOVSYNC_LOG environment variable.
///
/// Defaults to "info" level if GOVSYNC_LOG is not set. Set
/// GOVSYNC_LOG_FORMAT=json for machine-readable output.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Load a `.env` file from the working directory, if one exists.
///
/// Must run before [`init_tracing`] and configuration loading so both see
/// the variables it defines. Returns the loaded path so the caller can log it
/// once tracing is up.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv_outcome(dotenvy::dotenv())
}

fn dotenv_outcome(result: dotenvy::Result<PathBuf>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => {
            eprintln!("Failed to load .env file: {}", e);
            None
        }
    }
}

/// Log the `.env` file picked up by [`load_dotenv`]. Call after [`init_tracing`].
pub fn log_dotenv(path: Option<&Path>) {
    if let Some(path) = path {
        debug!(path = %path.display(), "Loaded .env file");
    }
}

/// Resolve the configuration file path from the environment.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}
