//! Alert evaluation and processing configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// What happens when a predicate stays true across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirePolicy {
    /// Fire on every cycle the predicate is true.
    #[default]
    EveryCycle,
    /// Fire once, then stay silent until the predicate turns false again.
    Once,
}

/// Where processed alert reports go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    /// Log the report.
    #[default]
    Log,
    /// POST the report as JSON to `webhook_url`.
    Webhook,
    /// Drop the report.
    None,
}

/// AI summarization settings (Anthropic Messages API).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// API key. Falls back to `ANTHROPIC_API_KEY`; summarization is
    /// disabled when neither is set.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
            base_url: "https://api.anthropic.com/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Publishing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub kind: PublishKind,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            kind: PublishKind::Log,
            webhook_url: None,
            timeout_secs: 30,
        }
    }
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Alert configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub fire_policy: FirePolicy,
    /// Directory receiving chart-ready datasets.
    pub output_dir: PathBuf,
    pub ai: AiConfig,
    pub publish: PublishConfig,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            fire_policy: FirePolicy::EveryCycle,
            output_dir: PathBuf::from("./graphs"),
            ai: AiConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}
