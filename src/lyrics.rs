//! Song lyrics tools served by `taylor-server`.
//!
//! `get_song` returns raw lyrics from lyrics.ovh; `analyze_song` adds simple
//! text statistics on top of the same fetch.

use crate::rpc::{ToolCallError, ToolDefinition, ToolHandler, ToolResponse, string_argument};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const SONGS_API_BASE: &str = "https://api.lyrics.ovh/v1";
pub const ARTIST: &str = "Taylor Swift";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const FETCH_FAILED: &str = "Unable to fetch detailed lyrics for that song.";
pub const LYRICS_NOT_FOUND: &str = "Lyrics not found.";

const TOP_WORDS: usize = 5;
const TOP_LINES: usize = 5;
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "for", "i", "i'm", "in", "is", "it", "it's",
    "me", "my", "of", "on", "so", "that", "the", "to", "was", "we", "you", "your",
];

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("lyrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lyrics service returned status {0}")]
    Status(u16),
    #[error("invalid lyrics service url '{0}'")]
    InvalidUrl(String),
}

#[derive(Debug, Deserialize)]
struct LyricsPayload {
    lyrics: Option<String>,
}

#[derive(Clone)]
pub struct LyricsClient {
    http: Client,
    base_url: String,
    artist: String,
}

impl LyricsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LyricsError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            artist: ARTIST.to_string(),
        })
    }

    /// Artist and title are percent-encoded as single path segments.
    pub fn song_url(&self, title: &str) -> Result<Url, LyricsError> {
        let invalid = || LyricsError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(&self.artist)
            .push(title.trim());
        Ok(url)
    }

    /// `Ok(None)` when the service answered but had no `lyrics` field.
    pub async fn fetch(&self, title: &str) -> Result<Option<String>, LyricsError> {
        let url = self.song_url(title)?;
        info!(song = title, "Fetching lyrics");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LyricsError::Status(status.as_u16()));
        }
        let payload: LyricsPayload = response.json().await?;
        Ok(payload.lyrics)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatedLine {
    pub line: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LyricsAnalysis {
    pub song_title: String,
    pub line_count: usize,
    pub section_count: usize,
    pub word_count: usize,
    pub unique_words: usize,
    pub lexical_diversity: f64,
    pub top_words: Vec<WordCount>,
    pub repeated_lines: Vec<RepeatedLine>,
}

impl LyricsAnalysis {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "\"{}\": {} lines in {} sections, {} words ({} unique, lexical diversity {:.2}).",
            self.song_title,
            self.line_count,
            self.section_count,
            self.word_count,
            self.unique_words,
            self.lexical_diversity
        );
        if !self.top_words.is_empty() {
            let words: Vec<String> = self
                .top_words
                .iter()
                .map(|entry| format!("{} ({})", entry.word, entry.count))
                .collect();
            out.push_str(&format!("\nMost frequent words: {}.", words.join(", ")));
        }
        if let Some(line) = self.repeated_lines.first() {
            out.push_str(&format!(
                "\nMost repeated line: \"{}\" ({}x).",
                line.line, line.count
            ));
        }
        out
    }
}

pub fn analyze(song_title: &str, lyrics: &str) -> LyricsAnalysis {
    let mut line_count = 0;
    let mut section_count = 0;
    let mut in_section = false;
    let mut line_counts: HashMap<String, (usize, usize, String)> = HashMap::new();
    for raw in lyrics.lines() {
        let line = raw.trim();
        if line.is_empty() {
            in_section = false;
            continue;
        }
        if !in_section {
            section_count += 1;
            in_section = true;
        }
        let order = line_count;
        line_count += 1;
        let entry = line_counts
            .entry(line.to_lowercase())
            .or_insert((0, order, line.to_string()));
        entry.0 += 1;
    }

    let words: Vec<String> = lyrics
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|word| word.trim_matches('\'').to_lowercase())
        .filter(|word| !word.is_empty())
        .collect();
    let mut frequencies: HashMap<&str, usize> = HashMap::new();
    for word in &words {
        *frequencies.entry(word.as_str()).or_default() += 1;
    }
    let unique_words = frequencies.len();
    let lexical_diversity = if words.is_empty() {
        0.0
    } else {
        (unique_words as f64 / words.len() as f64 * 1000.0).round() / 1000.0
    };

    let mut top_words: Vec<WordCount> = frequencies
        .iter()
        .filter(|(word, _)| !STOP_WORDS.contains(*word))
        .map(|(word, count)| WordCount {
            word: word.to_string(),
            count: *count,
        })
        .collect();
    top_words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    top_words.truncate(TOP_WORDS);

    let mut repeated: Vec<(usize, usize, String)> = line_counts
        .into_values()
        .filter(|(count, _, _)| *count > 1)
        .collect();
    repeated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let repeated_lines = repeated
        .into_iter()
        .take(TOP_LINES)
        .map(|(count, _, line)| RepeatedLine { line, count })
        .collect();

    LyricsAnalysis {
        song_title: song_title.to_string(),
        line_count,
        section_count,
        word_count: words.len(),
        unique_words,
        lexical_diversity,
        top_words,
        repeated_lines,
    }
}

/// Tool handler exposing `get_song` and `analyze_song`.
pub struct TaylorTools {
    client: LyricsClient,
}

impl TaylorTools {
    pub fn new(client: LyricsClient) -> Self {
        Self { client }
    }

    async fn get_song(&self, title: &str) -> ToolResponse {
        match self.client.fetch(title).await {
            Ok(Some(lyrics)) => ToolResponse::text(lyrics),
            Ok(None) => ToolResponse::text(LYRICS_NOT_FOUND),
            Err(err) => {
                warn!(song = title, %err, "Lyrics fetch failed");
                ToolResponse::text(FETCH_FAILED)
            }
        }
    }

    async fn analyze_song(&self, title: &str) -> ToolResponse {
        match self.client.fetch(title).await {
            Ok(Some(lyrics)) => {
                let analysis = analyze(title, &lyrics);
                let structured = serde_json::to_value(&analysis).unwrap_or(Value::Null);
                ToolResponse::text(analysis.summary()).with_structured(structured)
            }
            Ok(None) => ToolResponse::error(LYRICS_NOT_FOUND),
            Err(err) => {
                warn!(song = title, %err, "Lyrics fetch failed");
                ToolResponse::error(FETCH_FAILED)
            }
        }
    }
}

fn song_title_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "song_title": { "type": "string", "description": "Exact song title" }
        },
        "required": ["song_title"]
    })
}

#[async_trait]
impl ToolHandler for TaylorTools {
    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "get_song".into(),
                description: "Get the lyrics of a Taylor Swift song by title.".into(),
                input_schema: song_title_schema(),
            },
            ToolDefinition {
                name: "analyze_song".into(),
                description: "Analyze the lyrics of a Taylor Swift song: word counts, vocabulary, repeated lines and sections.".into(),
                input_schema: song_title_schema(),
            },
        ]
    }

    async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResponse, ToolCallError> {
        match name {
            "get_song" => {
                let title = string_argument(&arguments, "song_title")?;
                Ok(self.get_song(&title).await)
            }
            "analyze_song" => {
                let title = string_argument(&arguments, "song_title")?;
                Ok(self.analyze_song(&title).await)
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}
