//! Publishing processed alert reports.

use std::sync::Arc;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use super::{AlertError, AlertReport, Result};
use crate::config::{PublishConfig, PublishKind};
use crate::utils::retry::{is_retryable_status, is_retryable_transport, publish_backoff};

/// Destination for processed alert reports.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, report: &AlertReport) -> Result<()>;

    fn name(&self) -> &str;
}

/// Build the configured publisher; `None` when publishing is disabled.
pub fn publisher_from_config(config: &PublishConfig) -> Result<Option<Arc<dyn Publisher>>> {
    match config.kind {
        PublishKind::Log => Ok(Some(Arc::new(LogPublisher))),
        PublishKind::Webhook => {
            let endpoint = config.webhook_url.clone().ok_or_else(|| {
                AlertError::Config("webhook publishing needs alerts.publish.webhook_url".to_string())
            })?;
            let publisher = WebhookPublisher::new(endpoint, config.timeout())?;
            Ok(Some(Arc::new(publisher)))
        }
        PublishKind::None => Ok(None),
    }
}

/// Writes reports to the log.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, report: &AlertReport) -> Result<()> {
        info!(
            alert = %report.alert_name,
            fired_at = %report.fired_at,
            datasets = report.datasets.len(),
            analysis = report.analysis.as_deref().unwrap_or(""),
            post = report.post.as_deref().unwrap_or(""),
            "Alert report"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// POSTs reports as JSON to a webhook, retrying transient failures.
pub struct WebhookPublisher {
    client: Client,
    endpoint: String,
}

impl WebhookPublisher {
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(AlertError::Config("webhook endpoint not configured".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    async fn post(&self, report: &AlertReport) -> Result<()> {
        let response = self.client.post(&self.endpoint).json(report).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(endpoint = %self.endpoint, alert = %report.alert_name, "Alert report posted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(200).collect();
        if is_retryable_status(status) {
            warn!(endpoint = %self.endpoint, status = %status, body = %body, "Webhook returned retryable status");
            Err(AlertError::Unavailable(format!("HTTP {} - {}", status, body)))
        } else {
            error!(endpoint = %self.endpoint, status = %status, body = %body, "Webhook POST failed");
            Err(AlertError::Rejected(format!("HTTP {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, report: &AlertReport) -> Result<()> {
        (|| async { self.post(report).await })
            .retry(publish_backoff())
            .when(|e| {
                matches!(e, AlertError::Http(err) if is_retryable_transport(err))
                    || matches!(e, AlertError::Unavailable(_))
            })
            .await
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report() -> AlertReport {
        AlertReport {
            alert_name: "quorum_reached".to_string(),
            fired_at: Utc::now(),
            datasets: Vec::new(),
            analysis: Some("Quorum reached.".to_string()),
            post: None,
        }
    }

    #[test]
    fn test_from_config_kinds() {
        let mut config = PublishConfig::default();
        assert_eq!(publisher_from_config(&config).unwrap().unwrap().name(), "log");

        config.kind = PublishKind::None;
        assert!(publisher_from_config(&config).unwrap().is_none());

        config.kind = PublishKind::Webhook;
        assert!(publisher_from_config(&config).is_err());

        config.webhook_url = Some("http://localhost:1/hook".to_string());
        assert_eq!(publisher_from_config(&config).unwrap().unwrap().name(), "webhook");
    }

    #[tokio::test]
    async fn test_webhook_posts_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "alert_name": "quorum_reached",
                "analysis": "Quorum reached."
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let publisher =
            WebhookPublisher::new(format!("{}/hook", server.uri()), Duration::from_secs(5)).unwrap();
        publisher.publish(&report()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let publisher =
            WebhookPublisher::new(format!("{}/hook", server.uri()), Duration::from_secs(5)).unwrap();
        publisher.publish(&report()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_webhook_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let publisher =
            WebhookPublisher::new(format!("{}/hook", server.uri()), Duration::from_secs(5)).unwrap();
        let err = publisher.publish(&report()).await.unwrap_err();
        assert!(matches!(err, AlertError::Rejected(_)));
    }
}
