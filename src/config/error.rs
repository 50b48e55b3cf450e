use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse TOML config from {path:?}: {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse JSON config from {path:?}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported configuration file format '{extension}' (expected .json, .toml or .tml)")]
    UnsupportedFormat { extension: String },

    #[error("server script must be a .py or .js file: {path:?}")]
    UnsupportedScript { path: PathBuf },

    #[error("server '{server}' is invalid: {reason}")]
    InvalidServer { server: String, reason: String },

    #[error("server name '{server}' is declared more than once")]
    DuplicateServer { server: String },

    #[error("no enabled servers configured - at least one [servers] entry is required")]
    NoServersConfigured,
}

impl ConfigError {
    pub(crate) fn invalid_server(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidServer {
            server: server.into(),
            reason: reason.into(),
        }
    }
}
