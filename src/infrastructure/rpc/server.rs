use super::types::{PROTOCOL_VERSION, RpcRequest, RpcResponse};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Entry of a `tools/list` reply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Outcome of running a tool. Failures the caller should see are reported
/// with `is_error` instead of a protocol error.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }

    pub fn into_result(self) -> Value {
        let mut result = json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        });
        if let (Some(structured), Some(map)) = (self.structured, result.as_object_mut()) {
            map.insert("structuredContent".to_string(), structured);
        }
        result
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn tools(&self) -> Vec<ToolDefinition>;

    async fn call(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResponse, ToolCallError>;
}

/// Line-delimited JSON-RPC loop serving one `ToolHandler`.
pub struct McpServer<H> {
    info: ServerInfo,
    instructions: Option<String>,
    handler: H,
}

impl<H> McpServer<H>
where
    H: ToolHandler,
{
    pub fn new(info: ServerInfo, handler: H) -> Self {
        Self {
            info,
            instructions: None,
            handler,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Reads requests until the input closes. Only protocol messages are
    /// written to `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, "MCP server listening on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let reply = match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.handle_message(value).await,
                Err(err) => {
                    warn!(%err, "Received malformed JSON-RPC frame");
                    Some(RpcResponse::parse_error(format!("Parse error: {err}")))
                }
            };
            if let Some(reply) = reply {
                let mut encoded = reply.to_value().to_string();
                encoded.push('\n');
                writer.write_all(encoded.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        info!(server = %self.info.name, "Input closed; MCP server stopping");
        Ok(())
    }

    /// Handles one decoded frame; notifications and stray responses get no reply.
    pub async fn handle_message(&self, value: Value) -> Option<RpcResponse> {
        if value.get("method").is_none() {
            debug!("Ignoring frame without a method");
            return None;
        }
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => return Some(RpcResponse::invalid_request(err.to_string())),
        };
        if request.jsonrpc != "2.0" {
            return Some(RpcResponse::invalid_request(
                "Unsupported jsonrpc version (expected 2.0)",
            ));
        }
        if request.is_notification() {
            debug!(method = %request.method, "Received notification");
            return None;
        }
        Some(self.handle_request(request).await)
    }

    pub async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        debug!(method = %request.method, "Received JSON-RPC request");
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize_result()),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(id, json!({ "tools": self.handler.tools() })),
            "tools/call" => self.call_tool(id, request.params).await,
            other => {
                warn!(method = other, "Unknown JSON-RPC method");
                RpcResponse::method_not_found(id, other)
            }
        }
    }

    fn initialize_result(&self) -> Value {
        let mut result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": self.info,
        });
        if let (Some(instructions), Some(map)) = (&self.instructions, result.as_object_mut()) {
            map.insert("instructions".to_string(), Value::String(instructions.clone()));
        }
        result
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> RpcResponse {
        let Some(Value::Object(mut params)) = params else {
            return RpcResponse::invalid_params(id, "params must be an object with name");
        };
        let name = match params.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => return RpcResponse::invalid_params(id, "params.name must be a non-empty string"),
        };
        let arguments = match params.remove("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments,
            Some(_) => return RpcResponse::invalid_params(id, "params.arguments must be an object"),
        };

        info!(tool = %name, "Calling tool");
        match self.handler.call(&name, arguments).await {
            Ok(response) => {
                if response.is_error {
                    warn!(tool = %name, message = %response.text, "Tool reported an error");
                }
                RpcResponse::success(id, response.into_result())
            }
            Err(err) => {
                warn!(tool = %name, %err, "Tool call rejected");
                RpcResponse::invalid_params(id, err.to_string())
            }
        }
    }
}

/// Reads a required string argument.
pub fn string_argument(arguments: &Map<String, Value>, key: &str) -> Result<String, ToolCallError> {
    match arguments.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(_) => Err(ToolCallError::InvalidArguments(format!(
            "'{key}' must be a non-empty string"
        ))),
        None => Err(ToolCallError::InvalidArguments(format!("missing '{key}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn tools(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "echo".into(),
                description: "Echo a message".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            }]
        }

        async fn call(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> Result<ToolResponse, ToolCallError> {
            match name {
                "echo" => {
                    let message = string_argument(&arguments, "message")?;
                    if message == "fail" {
                        Ok(ToolResponse::error("asked to fail"))
                    } else {
                        Ok(ToolResponse::text(message.clone())
                            .with_structured(json!({ "length": message.len() })))
                    }
                }
                other => Err(ToolCallError::UnknownTool(other.to_string())),
            }
        }
    }

    fn server() -> McpServer<Echo> {
        McpServer::new(ServerInfo::new("echo", "0.1.0"), Echo).with_instructions("Say things back.")
    }

    fn request(id: u64, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: Some(json!(id)),
        }
    }

    #[tokio::test]
    async fn initialize_reports_server_info_and_instructions() {
        let reply = server().handle_request(request(1, "initialize", json!({}))).await;
        let result = reply.result.expect("result");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "echo");
        assert_eq!(result["instructions"], "Say things back.");
    }

    #[tokio::test]
    async fn lists_tools_with_camel_case_schema() {
        let reply = server().handle_request(request(2, "tools/list", json!({}))).await;
        let result = reply.result.expect("result");
        assert_eq!(result["tools"][0]["name"], "echo");
        assert_eq!(result["tools"][0]["inputSchema"]["required"][0], "message");
    }

    #[tokio::test]
    async fn tool_results_carry_text_and_structured_content() {
        let reply = server()
            .handle_request(request(
                3,
                "tools/call",
                json!({ "name": "echo", "arguments": { "message": "hello" } }),
            ))
            .await;
        let result = reply.result.expect("result");
        assert_eq!(result["content"][0]["text"], "hello");
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["length"], 5);

        let failed = server()
            .handle_request(request(
                4,
                "tools/call",
                json!({ "name": "echo", "arguments": { "message": "fail" } }),
            ))
            .await;
        assert_eq!(failed.result.expect("result")["isError"], true);
    }

    #[tokio::test]
    async fn bad_calls_are_invalid_params() {
        let unknown = server()
            .handle_request(request(5, "tools/call", json!({ "name": "nope" })))
            .await;
        let error = unknown.error.expect("error");
        assert_eq!(error.code, super::super::types::INVALID_PARAMS);
        assert_eq!(error.message, "Unknown tool: nope");

        let missing = server()
            .handle_request(request(6, "tools/call", json!({ "name": "echo", "arguments": {} })))
            .await;
        assert_eq!(
            missing.error.expect("error").message,
            "Invalid arguments: missing 'message'"
        );
    }

    #[tokio::test]
    async fn serve_answers_requests_and_skips_notifications() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server()
            .serve(BufReader::new(input.as_bytes()), &mut output)
            .await
            .expect("serve");

        let replies: Vec<Value> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["error"]["code"], -32700);
        assert_eq!(replies[2], json!({ "jsonrpc": "2.0", "id": 2, "result": {} }));
        assert_eq!(replies[3]["error"]["code"], -32601);
    }
}
