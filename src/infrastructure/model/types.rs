//! Model types - Request, Response, and Error types

use crate::application::catalog::ToolSchema;
use crate::types::{ChatMessage, ContentBlock};
use reqwest::StatusCode;
use thiserror::Error;

/// One call to the model: history, tools and sampling parameters.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            stop_reason: Some("end_turn".to_string()),
        }
    }
}

/// Model errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("provider '{provider}' requires an API key (set ANTHROPIC_API_KEY)")]
    MissingApiKey { provider: String },
    #[error("network error calling provider '{provider}': {source}")]
    Network {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider '{provider}' rejected the request with status {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ModelError {
    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey {
            provider: provider.into(),
        }
    }

    pub fn network(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            provider: provider.into(),
            source,
        }
    }

    pub fn api(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Short explanation fit for the chat prompt
    pub fn user_message(&self) -> String {
        match self {
            ModelError::MissingApiKey { provider } => {
                format!("Provider '{provider}' needs an API key. Set ANTHROPIC_API_KEY.")
            }
            ModelError::Network { provider, source } => {
                if source.is_connect() {
                    format!("Could not reach model provider '{provider}'.")
                } else if source.is_timeout() {
                    format!("Request to '{provider}' timed out.")
                } else if let Some(status) = source.status() {
                    match status {
                        StatusCode::NOT_FOUND => format!("Endpoint for '{provider}' not found."),
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            format!("Provider '{provider}' is unavailable right now.")
                        }
                        _ => format!("Request to '{provider}' failed: {}", status.as_u16()),
                    }
                } else {
                    format!("Network error talking to '{provider}'.")
                }
            }
            ModelError::Api {
                status, message, ..
            } => match *status {
                401 | 403 => "The API key was rejected.".to_string(),
                429 => "Rate limited by the model provider; try again shortly.".to_string(),
                529 => "The model provider is overloaded; try again shortly.".to_string(),
                _ => format!("Model request failed ({status}): {message}"),
            },
            ModelError::InvalidResponse { provider, .. } => {
                format!("Response from '{provider}' could not be understood.")
            }
        }
    }
}
