//! JSON-RPC plumbing shared by the stdio and SSE bindings.

use super::error::ToolInvokeError;
use super::interface::{RemoteTool, ServerHandshake, ToolOutput};
use crate::rpc::types::{PROTOCOL_VERSION, RpcResponse};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::debug;

type Responder = oneshot::Sender<Result<Value, ToolInvokeError>>;

/// One decoded inbound frame.
#[derive(Debug)]
pub(crate) enum Inbound {
    Response { id: Value, message: Value },
    Request { id: Value, method: String },
    Notification { method: String },
    Ignored,
}

pub(crate) fn classify(value: Value) -> Inbound {
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    match (value.get("id").cloned(), method) {
        (Some(id), Some(method)) => Inbound::Request { id, method },
        (Some(id), None) => Inbound::Response { id, message: value },
        (None, Some(method)) => Inbound::Notification { method },
        (None, None) => Inbound::Ignored,
    }
}

/// Matches responses to outstanding requests by id.
pub(crate) struct RpcCorrelator {
    server: String,
    pending: AsyncMutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
}

impl RpcCorrelator {
    pub(crate) fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn server(&self) -> &str {
        &self.server
    }

    /// Reserves an id and returns the encoded request together with its receiver.
    pub(crate) async fn prepare(
        &self,
        method: &str,
        params: Value,
    ) -> (String, Value, oneshot::Receiver<Result<Value, ToolInvokeError>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        (id, payload, rx)
    }

    pub(crate) async fn wait(
        &self,
        id: &str,
        method: &str,
        rx: oneshot::Receiver<Result<Value, ToolInvokeError>>,
        timeout: Duration,
    ) -> Result<Value, ToolInvokeError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(ToolInvokeError::Cancelled {
                server: self.server.clone(),
            }),
            Err(_) => {
                self.forget(id).await;
                Err(ToolInvokeError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    pub(crate) async fn forget(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    pub(crate) async fn handle_response(&self, id: Value, value: Value) {
        let Some(key) = response_key(&id) else {
            return;
        };

        let responder = self.pending.lock().await.remove(&key);
        let Some(sender) = responder else {
            debug!(
                server = %self.server,
                response_id = key,
                "received response for unknown request"
            );
            return;
        };

        let outcome = match value.get("error") {
            Some(error) => {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                Err(ToolInvokeError::Rpc {
                    server: self.server.clone(),
                    code,
                    message,
                })
            }
            None => Ok(value),
        };
        let _ = sender.send(outcome);
    }

    pub(crate) async fn fail_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(ToolInvokeError::Terminated {
                server: self.server.clone(),
            }));
        }
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }
}

fn response_key(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

pub(crate) fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub(crate) fn response(id: Value, result: Value) -> Value {
    RpcResponse::success(Some(id), result).to_value()
}

pub(crate) fn method_not_found(id: Value, method: &str) -> Value {
    RpcResponse::method_not_found(Some(id), method).to_value()
}

/// Request/notification primitive both bindings expose to the MCP layer.
#[async_trait]
pub(crate) trait RpcChannel: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError>;
}

pub(crate) async fn handshake<C>(channel: &C) -> Result<ServerHandshake, ToolInvokeError>
where
    C: RpcChannel + ?Sized,
{
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {}
    });
    let init_result = channel.request("initialize", params).await?;
    let instructions = init_result
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::to_string);
    channel
        .notify("notifications/initialized", json!({}))
        .await?;

    let listing = channel.request("tools/list", json!({})).await?;
    let tools = listing
        .get("tools")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(RemoteTool::from_listing).collect())
        .unwrap_or_default();

    Ok(ServerHandshake {
        instructions,
        tools,
    })
}

pub(crate) async fn call_tool<C>(
    channel: &C,
    tool: &str,
    arguments: Value,
) -> Result<ToolOutput, ToolInvokeError>
where
    C: RpcChannel + ?Sized,
{
    let params = json!({
        "name": tool,
        "arguments": match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        }
    });
    let result = channel.request("tools/call", params).await?;
    Ok(ToolOutput::from_result(result))
}
