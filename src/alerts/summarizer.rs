//! AI summarization of alert data via the Anthropic Messages API.

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AlertError, Result};
use crate::config::AiConfig;
use crate::utils::retry::{is_retryable_status, is_retryable_transport, publish_backoff};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Turns a prompt into generated text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Anthropic Messages API client.
pub struct AnthropicSummarizer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicSummarizer {
    /// Build from configuration; `None` when no API key is configured.
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Some(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }))
    }

    fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn send(&self, prompt: &str) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: MessageResponse = response.json().await?;
            return Ok(Self::extract_text(body.content));
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);

        if is_retryable_status(status) {
            Err(AlertError::Unavailable(format!("HTTP {} - {}", status, message)))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(AlertError::Config(format!("AI API key rejected: {}", message)))
        } else {
            Err(AlertError::Rejected(format!("HTTP {} - {}", status, message)))
        }
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");

        (|| async { self.send(prompt).await })
            .retry(publish_backoff())
            .when(|e| {
                matches!(e, AlertError::Http(err) if is_retryable_transport(err))
                    || matches!(e, AlertError::Unavailable(_))
            })
            .notify(|e, delay| warn!(error = %e, delay = ?delay, "Completion failed, retrying"))
            .await
    }
}

impl std::fmt::Debug for AnthropicSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicSummarizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> AiConfig {
        AiConfig {
            api_key: Some("test-key".to_string()),
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_api_key_disables_summarizer() {
        assert!(AnthropicSummarizer::from_config(&AiConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-3-5-sonnet-20241022",
                "content": [
                    {"type": "text", "text": "Quorum reached."},
                    {"type": "text", "text": "Turnout is up."}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = AnthropicSummarizer::from_config(&config(&server.uri()))
            .unwrap()
            .unwrap();
        let text = summarizer.complete("Summarize").await.unwrap();

        assert_eq!(text, "Quorum reached.\nTurnout is up.");
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "max_tokens too large"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = AnthropicSummarizer::from_config(&config(&server.uri()))
            .unwrap()
            .unwrap();
        let err = summarizer.complete("Summarize").await.unwrap_err();

        assert!(matches!(err, AlertError::Rejected(msg) if msg.contains("max_tokens too large")));
    }
}
