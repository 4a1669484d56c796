//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod alerts;
mod dispatch;
mod query;
mod scheduler;
mod storage;

pub use alerts::{AiConfig, AlertsConfig, FirePolicy, PublishConfig, PublishKind};
pub use dispatch::{AffinityMode, DispatchConfig, WorkerMode, DEFAULT_MAX_CORES};
pub use query::{QueryServiceConfig, DEFAULT_PAGE_SIZE};
pub use scheduler::SchedulerConfig;
pub use storage::{DatabaseConfig, DatabaseType, RegistryConfig};

use std::path::Path;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "govsync.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GOVSYNC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GOVSYNC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GOVSYNC_LOG";
/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV_VAR: &str = "GOVSYNC_LOG_FORMAT";

/// Environment variable carrying a triggered alert (JSON) into a worker.
pub const TRIGGERED_ALERT_ENV_VAR: &str = "GOVSYNC_TRIGGERED_ALERT";
/// Environment variable carrying the worker's core slot index.
pub const CORE_ID_ENV_VAR: &str = "GOVSYNC_CORE_ID";

/// Legacy environment variable for the query service API key.
pub const FLIPSIDE_API_KEY_ENV_VAR: &str = "FLIPSIDE_API_KEY";
/// Legacy environment variable for the AI API key.
pub const ANTHROPIC_API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";
/// Legacy environment variable for the database URL.
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// Errors raised while building configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational database holding refreshed tables and views.
    pub database: DatabaseConfig,
    /// Registry persistence.
    pub registry: RegistryConfig,
    /// Analytical query service.
    pub query_service: QueryServiceConfig,
    /// Alert dispatcher.
    pub dispatch: DispatchConfig,
    /// Alert evaluation and processing.
    pub alerts: AlertsConfig,
    /// Cycle scheduling.
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `govsync.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Legacy secrets (`FLIPSIDE_API_KEY`, `ANTHROPIC_API_KEY`,
    ///    `DATABASE_URL`) for fields still unset
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::from(config_path).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_legacy_env();
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing: in-memory SQLite, in-process workers.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.database.database_type = DatabaseType::Sqlite;
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        config.dispatch.mode = WorkerMode::Task;
        config.dispatch.affinity = AffinityMode::None;
        config.dispatch.poll_interval_ms = 10;
        config
    }

    /// Fill unset secrets from the legacy environment variables.
    fn apply_legacy_env(&mut self) {
        if self.query_service.api_key.is_none() {
            self.query_service.api_key = std::env::var(FLIPSIDE_API_KEY_ENV_VAR).ok();
        }
        if self.alerts.ai.api_key.is_none() {
            self.alerts.ai.api_key = std::env::var(ANTHROPIC_API_KEY_ENV_VAR).ok();
        }
        if let Ok(url) = std::env::var(DATABASE_URL_ENV_VAR) {
            if self.database.url == DatabaseConfig::default().url {
                self.database.url = url;
            }
        }
    }

    /// Reject settings no cycle could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_cores == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_cores must be at least 1".to_string(),
            ));
        }
        if self.dispatch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.query_service.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "query_service.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.query_service.page_size == 0 {
            return Err(ConfigError::Invalid(
                "query_service.page_size must be at least 1".to_string(),
            ));
        }
        if self.alerts.publish.kind == PublishKind::Webhook
            && self.alerts.publish.webhook_url.is_none()
        {
            return Err(ConfigError::Invalid(
                "alerts.publish.webhook_url is required for webhook publishing".to_string(),
            ));
        }
        if self.scheduler.interval_secs == Some(0) || self.scheduler.alert_interval_secs == Some(0)
        {
            return Err(ConfigError::Invalid(
                "scheduler intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
