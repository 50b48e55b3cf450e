use async_trait::async_trait;
use serde_json::{Value, json};

use super::error::ToolInvokeError;
use crate::config::ServerDescriptor;

/// A tool as advertised by a server's `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl RemoteTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: empty_schema(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub(crate) fn from_listing(value: &Value) -> Option<Self> {
        let name = value.get("name").and_then(Value::as_str)?;
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .map(|text| text.to_string());
        let input_schema = value
            .get("inputSchema")
            .filter(|schema| schema.is_object())
            .cloned()
            .unwrap_or_else(empty_schema);
        Some(Self {
            name: name.to_string(),
            description,
            input_schema,
        })
    }
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// What a server reports during the handshake.
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    pub instructions: Option<String>,
    pub tools: Vec<RemoteTool>,
}

/// Result of a `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<Value>,
    pub is_error: bool,
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: false,
            structured: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    pub(crate) fn from_result(result: Value) -> Self {
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let structured = result.get("structuredContent").cloned();
        Self {
            content,
            is_error,
            structured,
        }
    }

    /// Flattens the result into the text handed back to the model.
    pub fn as_text(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => block.to_string(),
            })
            .collect();
        if parts.is_empty() {
            if let Some(structured) = &self.structured {
                return structured.to_string();
            }
        }
        parts.join("\n")
    }

    /// The most useful error line in a failed result.
    pub fn error_message(&self) -> String {
        for block in &self.content {
            let is_text = block
                .get("type")
                .and_then(Value::as_str)
                .map(|value| value.eq_ignore_ascii_case("text"))
                .unwrap_or(false);
            if is_text {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }

        if let Some(message) = self
            .structured
            .as_ref()
            .and_then(|value| value.get("error"))
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            let trimmed = message.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }

        "tool returned an error without a message".to_string()
    }
}

/// A live MCP session with one server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn initialize(&self) -> Result<ServerHandshake, ToolInvokeError>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolOutput, ToolInvokeError>;

    async fn close(&self) -> Result<(), ToolInvokeError>;
}

/// Opens sessions for server descriptors.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn ToolSession>, ToolInvokeError>;
}
