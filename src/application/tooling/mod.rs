mod connector;
mod error;
mod interface;
mod process;
mod rpc;
mod sse;

pub use connector::TransportConnector;
pub use error::ToolInvokeError;
pub use interface::{RemoteTool, ServerHandshake, SessionConnector, ToolOutput, ToolSession};
pub use process::{ProcessSpec, StdioSession};
pub use sse::{SseSession, SseSpec};
