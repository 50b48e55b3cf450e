use crate::application::logger::{InteractionLogger, ServerEvent};
use crate::application::tooling::{
    RemoteTool, SessionConnector, ToolInvokeError, ToolOutput, ToolSession,
};
use crate::config::ServerDescriptor;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not connect to server '{server}': {source}")]
    Connection {
        server: String,
        #[source]
        source: ToolInvokeError,
    },
    #[error("server '{server}' is already connected")]
    AlreadyConnected { server: String },
    #[error("no servers could be connected ({attempted} attempted)")]
    NoServersAvailable { attempted: usize },
    #[error("server '{server}' is not connected")]
    ServerNotConnected { server: String },
    #[error("calling '{tool}' on '{server}' failed: {source}")]
    ToolCall {
        server: String,
        tool: String,
        #[source]
        source: ToolInvokeError,
    },
}

impl RegistryError {
    /// Short text suitable for inline markers shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::ToolCall { source, .. } => match source {
                ToolInvokeError::ToolReported { message, .. } => message.clone(),
                ToolInvokeError::Timeout { timeout, .. } => {
                    format!("no response within {}s", timeout.as_secs())
                }
                other => other.to_string(),
            },
            other => other.to_string(),
        }
    }
}

/// A live, initialized session with one server.
pub struct ServerConnection {
    pub name: String,
    pub transport: &'static str,
    pub tools: Vec<RemoteTool>,
    pub instructions: Option<String>,
    session: Box<dyn ToolSession>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Summary of a shutdown pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Live connections keyed by logical server name, in connection order.
pub struct ServerRegistry {
    connector: Arc<dyn SessionConnector>,
    logger: Arc<InteractionLogger>,
    connections: Vec<ServerConnection>,
}

impl ServerRegistry {
    pub fn new(connector: Arc<dyn SessionConnector>, logger: Arc<InteractionLogger>) -> Self {
        Self {
            connector,
            logger,
            connections: Vec::new(),
        }
    }

    pub async fn connect(
        &mut self,
        descriptor: &ServerDescriptor,
    ) -> Result<&ServerConnection, RegistryError> {
        if self.connection(&descriptor.name).is_some() {
            let err = RegistryError::AlreadyConnected {
                server: descriptor.name.clone(),
            };
            warn!(server = %descriptor.name, "Server is already connected");
            self.logger.server_connection(
                &descriptor.name,
                &ServerEvent::Failed {
                    error: err.to_string(),
                },
            );
            return Err(err);
        }

        info!(
            server = %descriptor.name,
            transport = descriptor.transport_label(),
            "Connecting to MCP server"
        );
        let session = match self.connector.open(descriptor).await {
            Ok(session) => session,
            Err(source) => return Err(self.connection_failed(&descriptor.name, source)),
        };

        let handshake = match session.initialize().await {
            Ok(handshake) => handshake,
            Err(source) => {
                if let Err(close_err) = session.close().await {
                    warn!(server = %descriptor.name, %close_err, "Failed to close session after failed handshake");
                }
                return Err(self.connection_failed(&descriptor.name, source));
            }
        };

        let tool_names: Vec<String> = handshake.tools.iter().map(|t| t.name.clone()).collect();
        info!(
            server = %descriptor.name,
            tools = ?tool_names,
            "Connected to MCP server"
        );
        self.logger.server_connection(
            &descriptor.name,
            &ServerEvent::Connected {
                transport: descriptor.transport_label().to_string(),
                tools: tool_names,
            },
        );

        self.connections.push(ServerConnection {
            name: descriptor.name.clone(),
            transport: descriptor.transport_label(),
            tools: handshake.tools,
            instructions: handshake.instructions,
            session,
        });
        let last = self.connections.len() - 1;
        Ok(&self.connections[last])
    }

    /// Connects every enabled descriptor in order. Individual failures are
    /// logged and skipped; only a run with zero successes is an error.
    pub async fn connect_all(
        &mut self,
        descriptors: &[ServerDescriptor],
    ) -> Result<Vec<String>, RegistryError> {
        let mut connected = Vec::new();
        let mut attempted = 0;
        for descriptor in descriptors {
            if !descriptor.enabled {
                info!(server = %descriptor.name, "Skipping disabled server");
                self.logger
                    .server_connection(&descriptor.name, &ServerEvent::Skipped);
                continue;
            }
            attempted += 1;
            match self.connect(descriptor).await {
                Ok(connection) => connected.push(connection.name.clone()),
                Err(err) => warn!(server = %descriptor.name, %err, "Continuing without server"),
            }
        }

        if connected.is_empty() {
            let err = RegistryError::NoServersAvailable { attempted };
            self.logger.error(None, "connect_all", &err.to_string());
            return Err(err);
        }
        info!(
            connected = connected.len(),
            attempted, "Server connection pass finished"
        );
        Ok(connected)
    }

    pub async fn dispatch(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutput, RegistryError> {
        let connection =
            self.connection(server)
                .ok_or_else(|| RegistryError::ServerNotConnected {
                    server: server.to_string(),
                })?;

        let output = connection
            .session
            .call_tool(tool, arguments)
            .await
            .map_err(|source| RegistryError::ToolCall {
                server: server.to_string(),
                tool: tool.to_string(),
                source,
            })?;

        if output.is_error {
            return Err(RegistryError::ToolCall {
                server: server.to_string(),
                tool: tool.to_string(),
                source: ToolInvokeError::ToolReported {
                    server: server.to_string(),
                    tool: tool.to_string(),
                    message: output.error_message(),
                },
            });
        }
        Ok(output)
    }

    /// Closes every session; one failing close does not stop the others.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for connection in self.connections.drain(..) {
            match connection.session.close().await {
                Ok(()) => {
                    info!(server = %connection.name, "Disconnected from MCP server");
                    self.logger
                        .server_connection(&connection.name, &ServerEvent::Disconnected);
                    report.closed.push(connection.name);
                }
                Err(err) => {
                    warn!(server = %connection.name, %err, "Failed to close MCP session");
                    let message = err.to_string();
                    self.logger.server_connection(
                        &connection.name,
                        &ServerEvent::DisconnectFailed {
                            error: message.clone(),
                        },
                    );
                    report.failed.push((connection.name, message));
                }
            }
        }
        report
    }

    pub fn connection(&self, server: &str) -> Option<&ServerConnection> {
        self.connections.iter().find(|conn| conn.name == server)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ServerConnection> {
        self.connections.iter()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.connections.iter().map(|conn| conn.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn connection_failed(&self, server: &str, source: ToolInvokeError) -> RegistryError {
        error!(server, %source, "Failed to connect to MCP server");
        let message = source.to_string();
        self.logger
            .server_connection(server, &ServerEvent::Failed { error: message.clone() });
        self.logger.error(None, "server_connection", &message);
        RegistryError::Connection {
            server: server.to_string(),
            source,
        }
    }
}
