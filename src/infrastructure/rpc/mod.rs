//! Server side of MCP over stdio: JSON-RPC envelopes and a line-delimited
//! dispatch loop for tool servers such as `taylor-server`.

pub mod server;
pub mod types;

pub use server::{
    McpServer, ServerInfo, ToolCallError, ToolDefinition, ToolHandler, ToolResponse, string_argument,
};
pub use types::{RpcError, RpcRequest, RpcResponse};
