use super::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMMAND: &str = "python";

/// How the client reaches a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    Stdio {
        command: PathBuf,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        workdir: Option<PathBuf>,
    },
    Sse {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: ServerTransport,
    pub enabled: bool,
    pub timeout: Duration,
}

impl ServerDescriptor {
    pub fn stdio(name: impl Into<String>, command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                workdir: None,
            },
            enabled: true,
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Sse {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            enabled: true,
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }

    /// Single-server mode: run a `.py` script with python or a `.js` script with node.
    pub fn from_script(name: impl Into<String>, script: &Path) -> Result<Self, ConfigError> {
        let command = command_for_script(&script.to_string_lossy()).ok_or_else(|| {
            ConfigError::UnsupportedScript {
                path: script.to_path_buf(),
            }
        })?;
        Ok(Self::stdio(
            name,
            command,
            vec![script.to_string_lossy().into_owned()],
        ))
    }

    pub fn transport_label(&self) -> &'static str {
        match self.transport {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::Sse { .. } => "sse",
        }
    }
}

fn command_for_script(script: &str) -> Option<&'static str> {
    if script.ends_with(".py") {
        Some("python")
    } else if script.ends_with(".js") {
        Some("node")
    } else {
        None
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    command: Option<String>,
    script: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    workdir: Option<String>,
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    timeout_secs: Option<u64>,
}

impl RawServer {
    pub(crate) fn into_descriptor(self, name: String) -> Result<ServerDescriptor, ConfigError> {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        if name.trim().is_empty() {
            return Err(ConfigError::invalid_server(name, "server name cannot be empty"));
        }

        let timeout = match self.timeout_secs {
            Some(0) => {
                return Err(ConfigError::invalid_server(
                    name,
                    "timeout_secs must be greater than zero",
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        };

        let transport = match self.url {
            Some(url) => {
                if self.command.is_some() || self.script.is_some() {
                    return Err(ConfigError::invalid_server(
                        name,
                        "'url' cannot be combined with 'command' or 'script'",
                    ));
                }
                let headers = self
                    .headers
                    .into_iter()
                    .map(|(key, value)| (key, expand(&value)))
                    .collect();
                ServerTransport::Sse {
                    url: expand(&url),
                    headers,
                }
            }
            None => {
                let mut args: Vec<String> = self.args.iter().map(|arg| expand(arg)).collect();
                if let Some(script) = &self.script {
                    args.insert(0, expand(script));
                }
                let command = match &self.command {
                    Some(command) => expand(command),
                    None => args
                        .first()
                        .and_then(|first| command_for_script(first))
                        .unwrap_or(DEFAULT_COMMAND)
                        .to_string(),
                };
                ServerTransport::Stdio {
                    command: PathBuf::from(command),
                    args,
                    env: self
                        .env
                        .into_iter()
                        .map(|(key, value)| (key, expand(&value)))
                        .collect(),
                    workdir: self.workdir.map(|dir| PathBuf::from(expand(&dir))),
                }
            }
        };

        Ok(ServerDescriptor {
            name,
            transport,
            enabled: self.enabled,
            timeout,
        })
    }
}
