use super::error::ConfigError;
use super::server::ServerDescriptor;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_HISTORY_PAIRS: usize = 10;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
pub const DEFAULT_LOG_FILE: &str = "logs/interactions.jsonl";

/// Model and bookkeeping settings from the optional `[client]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub history_pairs: usize,
    pub max_tool_rounds: usize,
    pub log_file: PathBuf,
    pub transcript_file: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            system_prompt: None,
            history_pairs: DEFAULT_HISTORY_PAIRS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            transcript_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct RawClientSettings {
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    history_pairs: Option<usize>,
    max_tool_rounds: Option<usize>,
    log_file: Option<String>,
    transcript_file: Option<String>,
}

impl RawClientSettings {
    pub(super) fn into_settings(self) -> ClientSettings {
        let defaults = ClientSettings::default();
        let expand_path = |s: String| -> PathBuf {
            PathBuf::from(
                shellexpand::full(&s)
                    .map(|cow| cow.into_owned())
                    .unwrap_or(s),
            )
        };
        ClientSettings {
            model: self.model.unwrap_or(defaults.model),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature,
            system_prompt: self.system_prompt.filter(|p| !p.trim().is_empty()),
            history_pairs: self.history_pairs.unwrap_or(defaults.history_pairs).max(1),
            max_tool_rounds: self
                .max_tool_rounds
                .unwrap_or(defaults.max_tool_rounds)
                .max(1),
            log_file: self.log_file.map(expand_path).unwrap_or(defaults.log_file),
            transcript_file: self.transcript_file.map(expand_path),
        }
    }
}

/// Everything needed to start a chat session.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client: ClientSettings,
    pub servers: Vec<ServerDescriptor>,
}

impl AppConfig {
    /// Load configuration from a `.json`, `.toml` or `.tml` file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        super::loader::load_config(path)
    }

    /// Single-server mode: the script runs as a server named `default`.
    pub fn for_script(script: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            client: ClientSettings::default(),
            servers: vec![ServerDescriptor::from_script(LEGACY_SERVER_NAME, script)?],
        })
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.iter().filter(|server| server.enabled)
    }
}

pub const LEGACY_SERVER_NAME: &str = "default";
