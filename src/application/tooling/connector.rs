use super::error::ToolInvokeError;
use super::interface::{SessionConnector, ToolSession};
use super::process::{ProcessSpec, StdioSession};
use super::sse::{SseSession, SseSpec};
use crate::config::{ServerDescriptor, ServerTransport};
use async_trait::async_trait;
use tracing::debug;

/// Opens real sessions, picking the binding from the descriptor's transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConnector;

#[async_trait]
impl SessionConnector for TransportConnector {
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn ToolSession>, ToolInvokeError> {
        debug!(
            server = %descriptor.name,
            transport = descriptor.transport_label(),
            "Opening MCP session"
        );
        match &descriptor.transport {
            ServerTransport::Stdio {
                command,
                args,
                env,
                workdir,
            } => {
                let session = StdioSession::spawn(ProcessSpec {
                    server: descriptor.name.clone(),
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                    workdir: workdir.clone(),
                    timeout: descriptor.timeout,
                })?;
                Ok(Box::new(session))
            }
            ServerTransport::Sse { url, headers } => {
                let session = SseSession::connect(SseSpec {
                    server: descriptor.name.clone(),
                    url: url.clone(),
                    headers: headers.clone(),
                    timeout: descriptor.timeout,
                })
                .await?;
                Ok(Box::new(session))
            }
        }
    }
}
