use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One block of message content in the Messages API wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn with_blocks(role: MessageRole, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Concatenated text of the message, ignoring tool blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_message_serializes_as_string_content() {
        let message = ChatMessage::new(MessageRole::User, "hi");
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value, json!({ "role": "user", "content": "hi" }));
    }

    #[test]
    fn tool_blocks_use_wire_tags() {
        let message = ChatMessage::with_blocks(
            MessageRole::Assistant,
            vec![
                ContentBlock::text("checking"),
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "get_song".into(),
                    input: json!({ "song_title": "Style" }),
                },
            ],
        );
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "tool_use");
        assert_eq!(value["content"][1]["input"]["song_title"], "Style");
    }

    #[test]
    fn tool_result_omits_false_error_flag() {
        let value = serde_json::to_value(ContentBlock::tool_result("tu_1", "ok")).expect("serialize");
        assert_eq!(
            value,
            json!({ "type": "tool_result", "tool_use_id": "tu_1", "content": "ok" })
        );
    }

    #[test]
    fn text_skips_tool_blocks() {
        let message = ChatMessage::with_blocks(
            MessageRole::Assistant,
            vec![
                ContentBlock::text("a"),
                ContentBlock::tool_result("x", "ignored"),
                ContentBlock::text("b"),
            ],
        );
        assert_eq!(message.text(), "a\nb");
    }

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!(MessageRole::from_str("user"), Some(MessageRole::User));
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
        assert_eq!(MessageRole::from_str("system"), None);
    }
}
