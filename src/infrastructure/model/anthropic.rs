//! Anthropic Messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::ModelProvider;
use super::types::{ModelError, ModelRequest, ModelResponse};
use crate::application::catalog::ToolSchema;
use crate::types::{ChatMessage, ContentBlock};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const API_VERSION: &str = "2023-06-01";
const PROVIDER_ID: &str = "anthropic";

#[derive(Clone)]
pub struct AnthropicClient {
    id: String,
    endpoint: String,
    api_key: String,
    http: Client,
}

impl AnthropicClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::missing_api_key(PROVIDER_ID));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ModelError::network(PROVIDER_ID, err))?;
        Ok(Self {
            id: PROVIDER_ID.to_string(),
            endpoint: endpoint.into(),
            api_key,
            http,
        })
    }

    /// Reads the API key (and an optional base URL override) from the environment.
    pub fn from_env() -> Result<Self, ModelError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::missing_api_key(PROVIDER_ID))?;
        let endpoint = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build URL from endpoint and path
    fn build_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolSchema],
}

impl<'a> From<&'a ModelRequest> for MessagesRequest<'a> {
    fn from(value: &'a ModelRequest) -> Self {
        Self {
            model: &value.model,
            max_tokens: value.max_tokens,
            system: value.system.as_deref(),
            temperature: value.temperature,
            messages: &value.messages,
            tools: &value.tools,
        }
    }
}

fn no_tools(tools: &&[ToolSchema]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Keeps the block types the loop understands and skips the rest.
fn parse_content(blocks: Vec<Value>) -> Vec<ContentBlock> {
    blocks
        .into_iter()
        .filter_map(|block| match serde_json::from_value::<ContentBlock>(block.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                debug!(
                    block_type = block.get("type").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                    "Skipping unsupported content block"
                );
                None
            }
        })
        .collect()
}

#[async_trait]
impl ModelProvider for AnthropicClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.build_url("/v1/messages");
        let payload = MessagesRequest::from(&request);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending request to model provider"
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::network(&self.id, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "Model provider returned an error");
            return Err(ModelError::api(&self.id, status.as_u16(), message));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ModelError::invalid_response(&self.id, e.to_string()))?;
        debug!(
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("none"),
            blocks = parsed.content.len(),
            "Received response from model provider"
        );

        Ok(ModelResponse {
            content: parse_content(parsed.content),
            stop_reason: parsed.stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;
    use serde_json::json;
    use serial_test::serial;

    fn request(tools: Vec<ToolSchema>) -> ModelRequest {
        ModelRequest {
            model: "claude-test".into(),
            system: None,
            messages: vec![ChatMessage::new(MessageRole::User, "hi")],
            tools,
            max_tokens: 1000,
            temperature: None,
        }
    }

    #[test]
    fn request_body_matches_messages_api() {
        let req = request(vec![ToolSchema {
            name: "get_song".into(),
            description: "[taylor] lyrics".into(),
            input_schema: json!({ "type": "object" }),
        }]);
        let body = serde_json::to_value(MessagesRequest::from(&req)).expect("serialize");
        assert_eq!(
            body,
            json!({
                "model": "claude-test",
                "max_tokens": 1000,
                "messages": [{ "role": "user", "content": "hi" }],
                "tools": [{
                    "name": "get_song",
                    "description": "[taylor] lyrics",
                    "input_schema": { "type": "object" }
                }]
            })
        );
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        let mut req = request(Vec::new());
        req.system = Some("be brief".into());
        let body = serde_json::to_value(MessagesRequest::from(&req)).expect("serialize");
        assert!(body.get("tools").is_none());
        assert_eq!(body["system"], "be brief");
    }

    #[test]
    fn unknown_blocks_are_skipped() {
        let blocks = parse_content(vec![
            json!({ "type": "thinking", "thinking": "hmm" }),
            json!({ "type": "text", "text": "hello" }),
            json!({ "type": "tool_use", "id": "tu_1", "name": "get_song", "input": { "song_title": "Style" } }),
        ]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], ContentBlock::text("hello"));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { name, .. } if name == "get_song"));
    }

    #[test]
    fn build_url_joins_cleanly() {
        let client = AnthropicClient::new("https://example.com/", "key", DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        assert_eq!(client.build_url("/v1/messages"), "https://example.com/v1/messages");
    }

    #[test]
    fn blank_key_is_rejected() {
        let result = AnthropicClient::new(DEFAULT_ENDPOINT, "  ", DEFAULT_REQUEST_TIMEOUT);
        assert!(matches!(result, Err(ModelError::MissingApiKey { .. })));
    }

    #[test]
    #[serial]
    fn from_env_requires_key() {
        let saved = std::env::var(API_KEY_ENV).ok();
        unsafe {
            std::env::remove_var(API_KEY_ENV);
        }
        assert!(matches!(
            AnthropicClient::from_env(),
            Err(ModelError::MissingApiKey { .. })
        ));

        unsafe {
            std::env::set_var(API_KEY_ENV, "test-key");
            std::env::set_var(BASE_URL_ENV, "http://localhost:9999");
        }
        let client = AnthropicClient::from_env().expect("client from env");
        assert_eq!(client.endpoint(), "http://localhost:9999");

        unsafe {
            std::env::remove_var(BASE_URL_ENV);
            match saved {
                Some(value) => std::env::set_var(API_KEY_ENV, value),
                None => std::env::remove_var(API_KEY_ENV),
            }
        }
    }
}
