//! Append-only JSON-lines log of everything a chat session does.
//!
//! Writes never fail the caller: problems with the log file are reported on
//! the tracing channel and the entry is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Startup,
    ServerConnection,
    UserQuery,
    AssistantResponse,
    ToolCall,
    Error,
    Shutdown,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            LogCategory::Startup => "startup",
            LogCategory::ServerConnection => "server_connection",
            LogCategory::UserQuery => "user_query",
            LogCategory::AssistantResponse => "assistant_response",
            LogCategory::ToolCall => "tool_call",
            LogCategory::Error => "error",
            LogCategory::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl LogEntry {
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            message: message.into(),
            conversation_id: None,
            details: Value::Null,
        }
    }

    pub fn in_conversation(mut self, conversation_id: Option<&str>) -> Self {
        self.conversation_id = conversation_id.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Connection lifecycle events for a single server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { transport: String, tools: Vec<String> },
    Failed { error: String },
    Skipped,
    Disconnected,
    DisconnectFailed { error: String },
}

/// One tool invocation as seen by the orchestration loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord<'a> {
    pub catalog_name: &'a str,
    pub server: Option<&'a str>,
    pub tool: Option<&'a str>,
    pub arguments: &'a Value,
    pub outcome: Result<String, String>,
}

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct InteractionLogger {
    path: PathBuf,
}

impl InteractionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn startup(&self, message: impl Into<String>, details: Value) {
        self.append(LogEntry::new(LogCategory::Startup, message).with_details(details));
    }

    pub fn server_connection(&self, server: &str, event: &ServerEvent) {
        let (message, details) = match event {
            ServerEvent::Connected { transport, tools } => (
                format!("Connected to {server}"),
                json!({ "server": server, "status": "connected", "transport": transport, "tools": tools }),
            ),
            ServerEvent::Failed { error } => (
                format!("Failed to connect to {server}"),
                json!({ "server": server, "status": "failed", "error": error }),
            ),
            ServerEvent::Skipped => (
                format!("Skipped disabled server {server}"),
                json!({ "server": server, "status": "skipped" }),
            ),
            ServerEvent::Disconnected => (
                format!("Disconnected from {server}"),
                json!({ "server": server, "status": "disconnected" }),
            ),
            ServerEvent::DisconnectFailed { error } => (
                format!("Failed to disconnect from {server}"),
                json!({ "server": server, "status": "disconnect_failed", "error": error }),
            ),
        };
        self.append(LogEntry::new(LogCategory::ServerConnection, message).with_details(details));
    }

    pub fn user_query(&self, conversation_id: &str, query: &str) {
        self.append(
            LogEntry::new(LogCategory::UserQuery, query).in_conversation(Some(conversation_id)),
        );
    }

    pub fn assistant_response(&self, conversation_id: &str, response: &str, tools_used: &[String]) {
        self.append(
            LogEntry::new(LogCategory::AssistantResponse, response)
                .in_conversation(Some(conversation_id))
                .with_details(json!({ "tools_used": tools_used })),
        );
    }

    pub fn tool_call(&self, conversation_id: &str, record: ToolCallRecord<'_>) {
        let (status, message, outcome) = match &record.outcome {
            Ok(result) => (
                "success",
                format!("Called {}", record.catalog_name),
                json!({ "result": preview(result) }),
            ),
            Err(error) => (
                "error",
                format!("Tool call {} failed", record.catalog_name),
                json!({ "error": error }),
            ),
        };
        let mut details = json!({
            "tool": record.catalog_name,
            "server": record.server,
            "original_name": record.tool,
            "arguments": record.arguments,
            "status": status,
        });
        if let (Value::Object(map), Value::Object(extra)) = (&mut details, outcome) {
            map.extend(extra);
        }
        self.append(
            LogEntry::new(LogCategory::ToolCall, message)
                .in_conversation(Some(conversation_id))
                .with_details(details),
        );
    }

    pub fn error(&self, conversation_id: Option<&str>, context: &str, error: &str) {
        self.append(
            LogEntry::new(LogCategory::Error, error)
                .in_conversation(conversation_id)
                .with_details(json!({ "context": context })),
        );
    }

    pub fn shutdown(&self, details: Value) {
        self.append(LogEntry::new(LogCategory::Shutdown, "Client shutting down").with_details(details));
    }

    /// The last `count` readable entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), %err, "Failed to read interaction log");
                }
                return Vec::new();
            }
        };
        let entries: Vec<LogEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = entries.len().saturating_sub(count);
        entries.into_iter().skip(skip).collect()
    }

    pub fn append(&self, entry: LogEntry) {
        if let Err(err) = self.try_append(&entry) {
            warn!(
                path = %self.path.display(),
                category = entry.category.as_str(),
                %err,
                "Failed to write interaction log entry"
            );
        }
    }

    fn try_append(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}
