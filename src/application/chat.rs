use crate::application::context::ConversationMessage;
use crate::application::logger::LogEntry;
use crate::application::orchestrator::Orchestrator;
use crate::model::ModelProvider;
use thiserror::Error;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

const DEFAULT_SHOW_COUNT: usize = 10;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Quit,
    Help,
    List,
    Context,
    ContextClear,
    ContextShow(usize),
    Logs,
    LogsRecent(usize),
    LogsFile,
    Empty,
    Query(String),
}

impl ChatCommand {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ChatCommand::Empty;
        }
        let lowered = trimmed.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        match words.as_slice() {
            ["quit"] | ["exit"] => ChatCommand::Quit,
            ["help"] => ChatCommand::Help,
            ["list"] => ChatCommand::List,
            ["context"] => ChatCommand::Context,
            ["context", "clear"] => ChatCommand::ContextClear,
            ["context", "show"] => ChatCommand::ContextShow(DEFAULT_SHOW_COUNT),
            ["context", "show", count] => match count.parse() {
                Ok(count) => ChatCommand::ContextShow(count),
                Err(_) => ChatCommand::Query(trimmed.to_string()),
            },
            ["logs"] => ChatCommand::Logs,
            ["logs", "recent"] => ChatCommand::LogsRecent(DEFAULT_SHOW_COUNT),
            ["logs", "recent", count] => match count.parse() {
                Ok(count) => ChatCommand::LogsRecent(count),
                Err(_) => ChatCommand::Query(trimmed.to_string()),
            },
            ["logs", "file"] => ChatCommand::LogsFile,
            _ => ChatCommand::Query(trimmed.to_string()),
        }
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  <text>             ask a question
  list               show connected servers and their tools
  context            show conversation summary
  context clear      start a new conversation
  context show [n]   show the last n messages
  logs               show the 10 most recent log entries
  logs recent [n]    show the last n log entries
  logs file          show the log file location
  quit | exit        leave";

/// Interactive loop over the process's stdin/stdout.
pub async fn run<P>(orchestrator: &mut Orchestrator<P>) -> Result<(), ChatError>
where
    P: ModelProvider,
{
    let stdin = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    run_with_io(orchestrator, stdin, &mut stdout).await
}

pub async fn run_with_io<P, R, W>(
    orchestrator: &mut Orchestrator<P>,
    reader: R,
    writer: &mut W,
) -> Result<(), ChatError>
where
    P: ModelProvider,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_block(
        writer,
        &format!("\n=== MCP Multi-Client Started! ===\n{HELP_TEXT}\n"),
    )
    .await?;

    let mut lines = reader.lines();
    loop {
        writer.write_all(b"\nQuery: ").await?;
        writer.flush().await?;
        let Some(line) = lines.next_line().await? else {
            debug!("stdin closed; leaving chat loop");
            break;
        };

        let output = match ChatCommand::parse(&line) {
            ChatCommand::Quit => break,
            ChatCommand::Empty => continue,
            ChatCommand::Help => HELP_TEXT.to_string(),
            ChatCommand::List => render_servers(orchestrator),
            ChatCommand::Context => render_summary(orchestrator),
            ChatCommand::ContextClear => {
                orchestrator.reset_context();
                format!(
                    "Conversation cleared. New conversation: {}",
                    orchestrator.context().conversation_id()
                )
            }
            ChatCommand::ContextShow(count) => render_messages(&orchestrator.context().recent(count)),
            ChatCommand::Logs => render_logs(&orchestrator.logger().recent(DEFAULT_SHOW_COUNT)),
            ChatCommand::LogsRecent(count) => render_logs(&orchestrator.logger().recent(count)),
            ChatCommand::LogsFile => {
                format!("Interaction log: {}", orchestrator.logger().path().display())
            }
            ChatCommand::Query(query) => {
                info!(chars = query.len(), "Processing query");
                let outcome = orchestrator.process_query(&query).await;
                outcome.answer
            }
        };
        write_block(writer, &format!("\n{output}\n")).await?;
    }
    Ok(())
}

async fn write_block<W>(writer: &mut W, text: &str) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub fn render_servers<P>(orchestrator: &Orchestrator<P>) -> String
where
    P: ModelProvider,
{
    let mut out = String::from("=== Connected Servers ===");
    for connection in orchestrator.registry().connections() {
        out.push_str(&format!("\n\n{} ({}):", connection.name, connection.transport));
        let mut any = false;
        for tool in orchestrator.catalog().tools_for(&connection.name) {
            any = true;
            let prefix = format!("[{}] ", connection.name);
            let description = tool
                .description
                .strip_prefix(&prefix)
                .unwrap_or(&tool.description);
            if tool.name == tool.original_name {
                out.push_str(&format!("\n  - {}: {}", tool.name, description));
            } else {
                out.push_str(&format!(
                    "\n  - {} (as {}): {}",
                    tool.original_name, tool.name, description
                ));
            }
        }
        if !any {
            out.push_str("\n  (no tools)");
        }
    }
    out.push_str(&format!("\n\nTotal tools: {}", orchestrator.catalog().len()));
    out
}

fn render_summary<P>(orchestrator: &Orchestrator<P>) -> String
where
    P: ModelProvider,
{
    let summary = orchestrator.context().summary();
    format!(
        "Conversation: {}\nStarted: {}\nUser messages: {}\nAssistant messages: {}\nHistory limit: {} exchanges",
        summary.conversation_id,
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.user_messages,
        summary.assistant_messages,
        summary.max_pairs,
    )
}

fn render_messages(messages: &[&ConversationMessage]) -> String {
    if messages.is_empty() {
        return "No messages in this conversation yet.".to_string();
    }
    messages
        .iter()
        .map(|message| {
            let mut line = format!(
                "[{}] {}: {}",
                message.timestamp.format("%H:%M:%S"),
                message.role.as_str(),
                message.content
            );
            if !message.tools_used.is_empty() {
                line.push_str(&format!(" (tools: {})", message.tools_used.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_logs(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return "No log entries yet.".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{} [{}] {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.category.as_str(),
                entry.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
