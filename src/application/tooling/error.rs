use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolInvokeError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("MCP server '{server}' request cancelled")]
    Cancelled { server: String },
    #[error("MCP server '{server}' did not answer '{method}' within {timeout:?}")]
    Timeout {
        server: String,
        method: String,
        timeout: Duration,
    },
    #[error("tool '{tool}' on MCP server '{server}' reported an error: {message}")]
    ToolReported {
        server: String,
        tool: String,
        message: String,
    },
}

impl ToolInvokeError {
    pub fn transport(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn server(&self) -> &str {
        match self {
            Self::Spawn { server, .. }
            | Self::Transport { server, .. }
            | Self::InvalidJson { server, .. }
            | Self::Rpc { server, .. }
            | Self::Terminated { server }
            | Self::Cancelled { server }
            | Self::Timeout { server, .. }
            | Self::ToolReported { server, .. } => server,
        }
    }
}
