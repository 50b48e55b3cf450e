use crate::application::catalog::{ToolCatalog, ToolSchema};
use crate::application::context::ConversationContext;
use crate::application::logger::{InteractionLogger, ToolCallRecord};
use crate::application::registry::{RegistryError, ServerRegistry, ShutdownReport};
use crate::application::tooling::SessionConnector;
use crate::application::transcript::ConversationTranscript;
use crate::config::{ClientSettings, ServerDescriptor};
use crate::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use crate::types::{ChatMessage, ContentBlock, MessageRole};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stored as the assistant turn when a reply carries no text.
pub const EMPTY_RESPONSE: &str = "(no response)";

/// Sampling and loop limits for a chat session.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub history_pairs: usize,
    pub max_tool_rounds: usize,
}

impl From<&ClientSettings> for OrchestratorSettings {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            system_prompt: settings.system_prompt.clone(),
            history_pairs: settings.history_pairs,
            max_tool_rounds: settings.max_tool_rounds,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub tools_used: Vec<String>,
    pub model_calls: usize,
}

/// Drives the model/tool loop over the connected servers.
pub struct Orchestrator<P> {
    provider: P,
    registry: ServerRegistry,
    catalog: ToolCatalog,
    context: ConversationContext,
    logger: Arc<InteractionLogger>,
    transcript: Option<ConversationTranscript>,
    settings: OrchestratorSettings,
    system: Option<String>,
}

impl<P> Orchestrator<P>
where
    P: ModelProvider,
{
    pub fn new(
        provider: P,
        connector: Arc<dyn SessionConnector>,
        logger: Arc<InteractionLogger>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            registry: ServerRegistry::new(connector, Arc::clone(&logger)),
            catalog: ToolCatalog::new(),
            context: ConversationContext::new(settings.history_pairs),
            logger,
            transcript: None,
            system: settings.system_prompt.clone(),
            settings,
        }
    }

    pub fn with_transcript(mut self, transcript: ConversationTranscript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Connects every enabled server and registers its tools in connection order.
    pub async fn connect_all(
        &mut self,
        descriptors: &[ServerDescriptor],
    ) -> Result<Vec<String>, RegistryError> {
        let connected = self.registry.connect_all(descriptors).await?;
        for connection in self.registry.connections() {
            let names = self.catalog.register(&connection.name, &connection.tools);
            debug!(server = %connection.name, tools = ?names, "Registered server tools");
        }
        self.system = compose_system_prompt(
            self.settings.system_prompt.as_deref(),
            self.registry
                .connections()
                .filter_map(|conn| conn.instructions.as_deref().map(|text| (conn.name.as_str(), text))),
        );
        info!(
            servers = connected.len(),
            tools = self.catalog.len(),
            "Tool catalog ready"
        );
        Ok(connected)
    }

    /// Runs one turn: model call, tool dispatch and follow-up calls until the
    /// model stops asking for tools. Failures end up inside the answer text.
    pub async fn process_query(&mut self, query: &str) -> TurnOutcome {
        let conversation_id = self.context.conversation_id().to_string();
        self.context.add_user(query);
        self.logger.user_query(&conversation_id, query);

        let tools = self.catalog.as_model_schema();
        let mut messages = self.context.as_model_messages();
        let mut model_calls = 1;

        let response = match self.call_model(&messages, &tools).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "Model call failed");
                self.logger
                    .error(Some(conversation_id.as_str()), "model_call", &err.to_string());
                let answer = format!("Error: {}", err.user_message());
                return self.finish(&conversation_id, query, answer, Vec::new(), model_calls);
            }
        };

        let mut parts: Vec<String> = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
        let mut pending: VecDeque<ContentBlock> = response.content.into();
        let mut rounds = 0;

        while let Some(block) = pending.pop_front() {
            match block {
                ContentBlock::Text { text } => {
                    if !text.trim().is_empty() {
                        parts.push(text.clone());
                    }
                    assistant_blocks.push(ContentBlock::Text { text });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    let (server, original) = match self.catalog.resolve(&name) {
                        Ok((server, original)) => (server.to_string(), original.to_string()),
                        Err(err) => {
                            warn!(tool = %name, "Model requested an unknown tool");
                            parts.push(format!("[Error: Tool {name} not found]"));
                            self.log_tool_call(&conversation_id, &name, None, &input, Err(err.to_string()));
                            continue;
                        }
                    };

                    if rounds >= self.settings.max_tool_rounds {
                        warn!(rounds, "Tool round limit reached");
                        parts.push(format!("[Stopped after {rounds} tool rounds]"));
                        self.logger.error(
                            Some(conversation_id.as_str()),
                            "tool_round_limit",
                            &format!("stopped before calling {name}: limit of {rounds} rounds reached"),
                        );
                        break;
                    }

                    info!(tool = %name, server = %server, "Dispatching tool call");
                    let output = match self.registry.dispatch(&server, &original, input.clone()).await {
                        Ok(output) => output,
                        Err(err) => {
                            warn!(tool = %name, server = %server, %err, "Tool call failed");
                            parts.push(format!("[Error calling {name}: {}]", err.user_message()));
                            self.log_tool_call(
                                &conversation_id,
                                &name,
                                Some((server.as_str(), original.as_str())),
                                &input,
                                Err(err.to_string()),
                            );
                            continue;
                        }
                    };

                    let result_text = output.as_text();
                    parts.push(format!("[Called {name} on {server}]"));
                    self.log_tool_call(
                        &conversation_id,
                        &name,
                        Some((server.as_str(), original.as_str())),
                        &input,
                        Ok(result_text.clone()),
                    );
                    if !tools_used.contains(&name) {
                        tools_used.push(name.clone());
                    }

                    assistant_blocks.push(ContentBlock::ToolUse { id: id.clone(), name, input });
                    messages.push(ChatMessage::with_blocks(
                        MessageRole::Assistant,
                        std::mem::take(&mut assistant_blocks),
                    ));
                    messages.push(ChatMessage::with_blocks(
                        MessageRole::User,
                        vec![ContentBlock::tool_result(id, result_text)],
                    ));

                    rounds += 1;
                    model_calls += 1;
                    match self.call_model(&messages, &tools).await {
                        Ok(follow_up) => {
                            for block in follow_up.content.into_iter().rev() {
                                pending.push_front(block);
                            }
                        }
                        Err(err) => {
                            warn!(%err, "Follow-up model call failed");
                            self.logger
                                .error(Some(conversation_id.as_str()), "model_call", &err.to_string());
                            parts.push(format!("[Error: {}]", err.user_message()));
                            break;
                        }
                    }
                }
                ContentBlock::ToolResult { .. } => {
                    debug!("Ignoring tool_result block in model output");
                }
            }
        }

        let mut answer = parts.join("\n");
        if answer.trim().is_empty() {
            warn!("Model returned no text for this turn");
            self.logger.error(
                Some(conversation_id.as_str()),
                "empty_response",
                "model reply had no text or tool output",
            );
            answer = EMPTY_RESPONSE.to_string();
        }
        self.finish(&conversation_id, query, answer, tools_used, model_calls)
    }

    /// Closes every server session and records the shutdown.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let report = self.registry.shutdown().await;
        self.logger.shutdown(json!({
            "closed": report.closed,
            "failed": report
                .failed
                .iter()
                .map(|(server, error)| json!({ "server": server, "error": error }))
                .collect::<Vec<_>>(),
        }));
        report
    }

    pub fn reset_context(&mut self) {
        let previous = self.context.conversation_id().to_string();
        self.context.reset();
        info!(
            previous = %previous,
            conversation = %self.context.conversation_id(),
            "Conversation context cleared"
        );
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn logger(&self) -> &InteractionLogger {
        &self.logger
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_deref()
    }

    async fn call_model(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, ModelError> {
        let request = ModelRequest {
            model: self.settings.model.clone(),
            system: self.system.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        self.provider.complete(request).await
    }

    fn log_tool_call(
        &self,
        conversation_id: &str,
        catalog_name: &str,
        provenance: Option<(&str, &str)>,
        arguments: &Value,
        outcome: Result<String, String>,
    ) {
        self.logger.tool_call(
            conversation_id,
            ToolCallRecord {
                catalog_name,
                server: provenance.map(|(server, _)| server),
                tool: provenance.map(|(_, tool)| tool),
                arguments,
                outcome: outcome.clone(),
            },
        );
        if let Err(error) = outcome {
            self.logger.error(Some(conversation_id), "tool_call", &error);
        }
    }

    fn finish(
        &mut self,
        conversation_id: &str,
        query: &str,
        answer: String,
        tools_used: Vec<String>,
        model_calls: usize,
    ) -> TurnOutcome {
        self.context.add_assistant(answer.clone(), tools_used.clone());
        self.logger
            .assistant_response(conversation_id, &answer, &tools_used);
        if let Some(transcript) = &self.transcript {
            transcript.record(conversation_id, query, &answer);
        }
        TurnOutcome {
            answer,
            tools_used,
            model_calls,
        }
    }
}

/// Appends per-server guidance from the handshake to the configured prompt.
fn compose_system_prompt<'a>(
    base: Option<&str>,
    guidance: impl Iterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    let lines: Vec<String> = guidance
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(server, text)| format!("- {server}: {}", text.trim()))
        .collect();
    match (base, lines.is_empty()) {
        (None, true) => None,
        (Some(base), true) => Some(base.to_string()),
        (base, false) => {
            let mut prompt = base.map(|b| format!("{b}\n\n")).unwrap_or_default();
            prompt.push_str("Tool server guidance:\n");
            prompt.push_str(&lines.join("\n"));
            Some(prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_without_guidance_is_unchanged() {
        assert_eq!(compose_system_prompt(None, std::iter::empty()), None);
        assert_eq!(
            compose_system_prompt(Some("be brief"), std::iter::empty()).as_deref(),
            Some("be brief")
        );
    }

    #[test]
    fn guidance_is_listed_per_server() {
        let prompt = compose_system_prompt(
            Some("be brief"),
            vec![("taylor", "Use exact song titles."), ("empty", "  ")].into_iter(),
        )
        .expect("prompt");
        assert_eq!(
            prompt,
            "be brief\n\nTool server guidance:\n- taylor: Use exact song titles."
        );
    }
}
