use super::error::ToolInvokeError;
use super::interface::{ServerHandshake, ToolOutput, ToolSession};
use super::rpc::{self, Inbound, RpcChannel, RpcCorrelator};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Launch parameters for a server spoken to over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub server: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Duration,
}

/// MCP session over a child process, one JSON message per line.
#[derive(Clone)]
pub struct StdioSession {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    spec: ProcessSpec,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    rpc: RpcCorrelator,
}

impl StdioSession {
    pub fn spawn(spec: ProcessSpec) -> Result<Self, ToolInvokeError> {
        let mut command = Command::new(&spec.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }
        if !spec.args.is_empty() {
            command.args(&spec.args);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ToolInvokeError::Spawn {
            server: spec.server.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolInvokeError::transport(&spec.server, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                ToolInvokeError::transport(&spec.server, "failed to capture server stdout")
            })?;

        info!(
            server = %spec.server,
            command = %display_command(&spec.command, &spec.args),
            pid = child.id(),
            "Spawned MCP server process"
        );

        let inner = Arc::new(StdioInner {
            rpc: RpcCorrelator::new(spec.server.clone()),
            spec,
            child: AsyncMutex::new(Some(child)),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        Ok(Self { inner })
    }

    pub fn server(&self) -> &str {
        &self.inner.spec.server
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn initialize(&self) -> Result<ServerHandshake, ToolInvokeError> {
        rpc::handshake(self.inner.as_ref()).await
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolOutput, ToolInvokeError> {
        rpc::call_tool(self.inner.as_ref(), tool, arguments).await
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl RpcChannel for StdioInner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let (id, payload, rx) = self.rpc.prepare(method, params).await;
        if let Err(err) = self.write_message(&payload).await {
            self.rpc.forget(&id).await;
            return Err(err);
        }
        self.rpc.wait(&id, method, rx, self.spec.timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        self.write_message(&rpc::notification(method, params)).await
    }
}

impl StdioInner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    if let Err(err) = self.process_inbound_message(value).await {
                        warn!(
                            server = %self.spec.server,
                            %err,
                            "failed to process message from MCP server"
                        );
                    }
                }
                Err(source) => {
                    warn!(
                        server = %self.spec.server,
                        line = raw,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                }
            }
        }

        debug!(server = %self.spec.server, "MCP server stdout closed");
        self.writer.lock().await.take();
        self.rpc.fail_all().await;
    }

    async fn process_inbound_message(&self, value: Value) -> Result<(), ToolInvokeError> {
        match rpc::classify(value) {
            Inbound::Response { id, message } => {
                self.rpc.handle_response(id, message).await;
                Ok(())
            }
            Inbound::Request { id, method } => self.handle_server_request(id, &method).await,
            Inbound::Notification { method } => {
                handle_notification(&self.spec.server, &method);
                Ok(())
            }
            Inbound::Ignored => Ok(()),
        }
    }

    async fn handle_server_request(&self, id: Value, method: &str) -> Result<(), ToolInvokeError> {
        match method {
            "ping" => self.write_message(&rpc::response(id, json!({}))).await,
            other => {
                warn!(
                    server = %self.spec.server,
                    method = other,
                    "server sent unsupported request"
                );
                self.write_message(&rpc::method_not_found(id, other)).await
            }
        }
    }

    async fn write_message(&self, message: &Value) -> Result<(), ToolInvokeError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| ToolInvokeError::InvalidJson {
                server: self.spec.server.clone(),
                source,
            })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| ToolInvokeError::Terminated {
                server: self.spec.server.clone(),
            })?;
        let io_error = |source: std::io::Error| {
            ToolInvokeError::transport(&self.spec.server, source.to_string())
        };
        stream.write_all(encoded.as_bytes()).await.map_err(io_error)?;
        stream.write_all(b"\n").await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ToolInvokeError> {
        // Closing stdin lets well-behaved servers exit on their own.
        self.writer.lock().await.take();

        let mut state = self.child.lock().await;
        let result = match state.take() {
            Some(mut child) => {
                let exited = tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_ok();
                if exited {
                    Ok(())
                } else {
                    debug!(server = %self.spec.server, "MCP server did not exit; killing");
                    child.kill().await.map_err(|source| {
                        ToolInvokeError::transport(&self.spec.server, source.to_string())
                    })
                }
            }
            None => Ok(()),
        };
        drop(state);

        self.rpc.fail_all().await;
        result
    }
}

pub(super) fn handle_notification(server: &str, method: &str) {
    if method == "notifications/tools/list_changed" {
        info!(
            server,
            "server reported a changed tool list; reconnect to pick it up"
        );
    } else {
        debug!(server, method, "received notification from server");
    }
}

fn display_command(command: &Path, args: &[String]) -> String {
    let mut parts = vec![command.display().to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}
