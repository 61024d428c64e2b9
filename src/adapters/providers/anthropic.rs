//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProviderConfig;
use crate::domain::ports::{
    Completion, CompletionRequest, ModelProvider, ProviderError, ProviderErrorKind,
};

/// Configuration for the Anthropic provider.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key (will be read from ANTHROPIC_API_KEY env if not set).
    pub api_key: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// API version header.
    pub api_version: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
        }
    }
}

impl From<&ProviderConfig> for AnthropicConfig {
    fn from(config: &ProviderConfig) -> Self {
        let defaults = Self::default();
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone().unwrap_or(defaults.base_url),
            api_version: config.api_version.clone(),
        }
    }
}

impl AnthropicConfig {
    /// Get API key from config or environment.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

/// Map an HTTP status to a retry classification.
///
/// Rate limiting (429), overload (529) and server errors are transient;
/// every other client error is permanent.
pub fn classify_status(status: StatusCode) -> ProviderErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529 {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::Permanent
    }
}

/// Model provider backed by the Anthropic Messages API.
///
/// The API has no sampling seed; `ExecutionParams::seed` only diversifies
/// cache keys and prompts.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let api_key = self
            .config
            .get_api_key()
            .ok_or_else(|| ProviderError::permanent("ANTHROPIC_API_KEY not set"))?;

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.params.max_tokens,
            system: (!request.system.is_empty()).then_some(request.system.as_str()),
            messages: vec![Message { role: "user", content: &request.prompt }],
            temperature: request.params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError {
                kind: classify_status(status),
                message: format!("API error {}: {}", status, text),
            });
        }

        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("Failed to parse response: {}", e)))?;

        let text = result
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Completion {
            text,
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionParams;
    use mockito::Server;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-haiku-4-5".to_string(),
            system: "Be terse.".to_string(),
            prompt: "Say hello".to_string(),
            params: ExecutionParams { max_tokens: 10, ..Default::default() },
        }
    }

    fn provider(url: String) -> AnthropicProvider {
        AnthropicProvider::new(AnthropicConfig {
            api_key: Some("test-api-key".to_string()),
            base_url: url,
            api_version: "2023-06-01".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), ProviderErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ProviderErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::from_u16(529).unwrap()), ProviderErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ProviderErrorKind::Permanent);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-api-key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "id": "msg_01",
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "text", "text": "Hello"}],
                    "model": "claude-haiku-4-5",
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 12, "output_tokens": 1}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let completion = provider(server.url()).complete(&request()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.input_tokens, 12);
        assert_eq!(completion.output_tokens, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_body(r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#)
            .create_async()
            .await;

        let err = provider(server.url()).complete(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_auth_error_is_permanent() {
        let mut server = Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(401).create_async().await;

        let err = provider(server.url()).complete(&request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
    }
}
