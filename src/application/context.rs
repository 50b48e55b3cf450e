use crate::domain::types::{ChatMessage, MessageRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub conversation_id: String,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub started_at: DateTime<Utc>,
    pub max_pairs: usize,
}

/// Bounded history of the current conversation.
///
/// Holds at most `max_pairs` user/assistant exchanges. Older messages are
/// dropped first, and the history never starts with an assistant message.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    conversation_id: String,
    started_at: DateTime<Utc>,
    max_pairs: usize,
    messages: VecDeque<ConversationMessage>,
}

impl ConversationContext {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            conversation_id: new_conversation_id(),
            started_at: Utc::now(),
            max_pairs: max_pairs.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.push(MessageRole::User, content.into(), Vec::new());
    }

    pub fn add_assistant(&mut self, content: impl Into<String>, tools_used: Vec<String>) {
        self.push(MessageRole::Assistant, content.into(), tools_used);
    }

    pub fn as_model_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|message| ChatMessage::new(message.role, message.content.clone()))
            .collect()
    }

    /// Starts a fresh conversation with a new identifier.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.conversation_id = new_conversation_id();
        self.started_at = Utc::now();
    }

    pub fn summary(&self) -> ContextSummary {
        let user_messages = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .count();
        ContextSummary {
            conversation_id: self.conversation_id.clone(),
            user_messages,
            assistant_messages: self.messages.len() - user_messages,
            started_at: self.started_at,
            max_pairs: self.max_pairs,
        }
    }

    /// The last `count` messages, oldest first.
    pub fn recent(&self, count: usize) -> Vec<&ConversationMessage> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, role: MessageRole, content: String, tools_used: Vec<String>) {
        self.messages.push_back(ConversationMessage {
            role,
            content,
            timestamp: Utc::now(),
            tools_used,
        });
        self.trim();
    }

    fn trim(&mut self) {
        let limit = self.max_pairs * 2;
        while self.messages.len() > limit {
            self.messages.pop_front();
        }
        while self
            .messages
            .front()
            .is_some_and(|message| message.role == MessageRole::Assistant)
        {
            self.messages.pop_front();
        }
    }
}

fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_at_most_n_pairs() {
        let mut context = ConversationContext::new(3);
        for index in 0..10 {
            context.add_user(format!("q{index}"));
            context.add_assistant(format!("a{index}"), Vec::new());
            assert!(context.len() <= 6);
        }
        let messages = context.as_model_messages();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].text(), "q7");
        assert_eq!(messages[5].text(), "a9");
    }

    #[test]
    fn never_starts_with_assistant_message() {
        let mut context = ConversationContext::new(1);
        context.add_user("q1");
        context.add_assistant("a1", Vec::new());
        context.add_user("q2");
        // Dropping q1 leaves a1 at the head, which goes too.
        let messages = context.as_model_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].text(), "q2");
    }

    #[test]
    fn reset_clears_and_changes_identifier() {
        let mut context = ConversationContext::new(10);
        let before = context.conversation_id().to_string();
        context.add_user("hello");
        context.reset();
        assert!(context.is_empty());
        assert_ne!(context.conversation_id(), before);
    }

    #[test]
    fn summary_counts_roles() {
        let mut context = ConversationContext::new(10);
        context.add_user("q");
        context.add_assistant("a", vec!["get_song".into()]);
        context.add_user("q2");
        let summary = context.summary();
        assert_eq!(summary.user_messages, 2);
        assert_eq!(summary.assistant_messages, 1);
        assert_eq!(summary.conversation_id, context.conversation_id());
        assert_eq!(context.recent(1)[0].content, "q2");
        assert_eq!(context.recent(5)[1].tools_used, vec!["get_song".to_string()]);
    }
}
