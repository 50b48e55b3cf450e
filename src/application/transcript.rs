use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub bot_response: String,
}

/// Human-readable JSON document of exchanges grouped by conversation id.
///
/// The whole document is rewritten after every exchange, so this is only
/// meant for interactive sessions of modest length.
#[derive(Debug, Clone)]
pub struct ConversationTranscript {
    path: PathBuf,
}

impl ConversationTranscript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, conversation_id: &str, user_message: &str, bot_response: &str) {
        let entry = TranscriptEntry {
            timestamp: Utc::now(),
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
        };
        if let Err(err) = self.try_record(conversation_id, entry) {
            warn!(path = %self.path.display(), %err, "Failed to update conversation transcript");
        }
    }

    pub fn entries(&self, conversation_id: &str) -> Vec<TranscriptEntry> {
        self.load()
            .ok()
            .and_then(|mut doc| doc.remove(conversation_id))
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn try_record(&self, conversation_id: &str, entry: TranscriptEntry) -> io::Result<()> {
        let mut document = self.load()?;
        let slot = document
            .entry(conversation_id.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(serde_json::to_value(entry)?),
            other => *other = Value::Array(vec![serde_json::to_value(entry)?]),
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(&Value::Object(document))?;
        fs::write(&self.path, encoded)
    }

    fn load(&self) -> io::Result<Map<String, Value>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) | Err(_) => {
                    warn!(path = %self.path.display(), "Transcript is not a JSON object; starting over");
                    Ok(Map::new())
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_entries_by_conversation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcript = ConversationTranscript::new(dir.path().join("conversations.json"));
        transcript.record("a", "hello", "hi");
        transcript.record("b", "other", "reply");
        transcript.record("a", "again", "sure");

        let entries = transcript.entries("a");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].user_message, "again");
        assert_eq!(transcript.entries("b")[0].bot_response, "reply");
        assert!(transcript.entries("missing").is_empty());
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conversations.json");
        fs::write(&path, "not json").expect("write");
        let transcript = ConversationTranscript::new(&path);
        transcript.record("a", "q", "r");
        assert_eq!(transcript.entries("a").len(), 1);
    }
}
