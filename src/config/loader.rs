use super::app::{AppConfig, RawClientSettings};
use super::error::ConfigError;
use super::server::{RawServer, ServerDescriptor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{debug, info};

static ENV_LOADER: Once = Once::new();

/// Ensures environment variables from a local `.env` are loaded once
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded environment from .env");
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(Self::Json),
            "toml" | "tml" => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }
}

/// What the single CLI argument points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    ConfigFile(PathBuf),
    Script(PathBuf),
}

impl LaunchTarget {
    pub fn from_arg(arg: &str) -> Self {
        let path = PathBuf::from(arg);
        if ConfigFormat::from_path(&path).is_ok() {
            Self::ConfigFile(path)
        } else {
            Self::Script(path)
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        match self {
            Self::ConfigFile(path) => load_config(path),
            Self::Script(path) => {
                info!(script = %path.display(), "Using single-server mode");
                AppConfig::for_script(path)
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    client: RawClientSettings,
    #[serde(default)]
    servers: Value,
}

/// Load and validate configuration from a file path
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    ensure_env_loaded();
    let format = ConfigFormat::from_path(path)?;
    debug!(path = %path.display(), ?format, "Reading client configuration file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let parsed: RawConfig = match format {
        ConfigFormat::Json => {
            serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson {
                path: path.to_path_buf(),
                source,
            })?
        }
        ConfigFormat::Toml => toml::from_str(&content).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?,
    };

    let config = AppConfig {
        client: parsed.client.into_settings(),
        servers: parse_servers(parsed.servers)?,
    };
    if config.enabled_servers().next().is_none() {
        return Err(ConfigError::NoServersConfigured);
    }
    info!(
        path = %path.display(),
        servers = config.servers.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// `servers` is either a table keyed by server name or a list of tables with a `name` key.
fn parse_servers(value: Value) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let entries: Vec<(String, Value)> = match value {
        Value::Null => Vec::new(),
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ConfigError::invalid_server(format!("#{index}"), "missing 'name'")
                    })?;
                Ok((name, item))
            })
            .collect::<Result<_, ConfigError>>()?,
        _ => {
            return Err(ConfigError::invalid_server(
                "servers",
                "expected a table or a list of tables",
            ));
        }
    };

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(entries.len());
    for (name, raw) in entries {
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateServer { server: name });
        }
        let raw: RawServer = serde_json::from_value(raw)
            .map_err(|err| ConfigError::invalid_server(name.clone(), err.to_string()))?;
        servers.push(raw.into_descriptor(name)?);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_selected_by_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/servers.JSON")).expect("json"),
            ConfigFormat::Json
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("servers.tml")).expect("tml"),
            ConfigFormat::Toml
        );
        assert!(matches!(
            ConfigFormat::from_path(Path::new("servers.yaml")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn launch_target_distinguishes_scripts() {
        assert_eq!(
            LaunchTarget::from_arg("servers.toml"),
            LaunchTarget::ConfigFile(PathBuf::from("servers.toml"))
        );
        assert_eq!(
            LaunchTarget::from_arg("taylor.py"),
            LaunchTarget::Script(PathBuf::from("taylor.py"))
        );
    }

    #[test]
    fn list_form_requires_names() {
        let err = parse_servers(serde_json::json!([{ "command": "node" }]))
            .expect_err("missing name");
        assert!(matches!(err, ConfigError::InvalidServer { .. }));
    }

    #[test]
    fn list_form_rejects_duplicates() {
        let err = parse_servers(serde_json::json!([
            { "name": "a", "command": "node" },
            { "name": "a", "command": "python" }
        ]))
        .expect_err("duplicate");
        assert!(matches!(err, ConfigError::DuplicateServer { .. }));
    }

    #[test]
    fn map_form_keeps_declaration_order() {
        let servers = parse_servers(serde_json::json!({
            "zeta": { "command": "node" },
            "alpha": { "command": "python" }
        }))
        .expect("servers");
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
