// Config loading tests - JSON/TOML server files and the launch argument
//
// Tests focused on configuration file loading and validation errors.

use mcp_chat_client::config::{
    AppConfig, ConfigError, LEGACY_SERVER_NAME, LaunchTarget, ServerTransport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn write_config(dir: &Path, file_name: &str, content: &str) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, content).expect("Failed to write config");
    path
}

#[test]
fn returns_error_when_file_not_found() {
    let result = AppConfig::load(Path::new("/nonexistent/path/servers.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound { .. })));
}

#[test]
fn loads_toml_servers_in_declaration_order() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        "servers.toml",
        r#"
[client]
model = "claude-test"
max_tokens = 512
history_pairs = 4
max_tool_rounds = 3

[servers.fs]
command = "npx"
args = ["@modelcontextprotocol/server-filesystem", "/tmp"]
env = { DEBUG = "1" }
timeout_secs = 5

[servers.remote]
url = "http://localhost:8000/sse"
headers = { Authorization = "Bearer token" }

[servers.archived]
command = "node"
args = ["old.js"]
enabled = false
"#,
    );

    let config = AppConfig::load(&path).expect("config loads");
    assert_eq!(config.client.model, "claude-test");
    assert_eq!(config.client.max_tokens, 512);
    assert_eq!(config.client.history_pairs, 4);
    assert_eq!(config.client.max_tool_rounds, 3);

    let names: Vec<_> = config.servers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["fs", "remote", "archived"]);
    let enabled: Vec<_> = config.enabled_servers().map(|s| s.name.as_str()).collect();
    assert_eq!(enabled, vec!["fs", "remote"]);

    let fs_server = &config.servers[0];
    assert_eq!(fs_server.timeout, Duration::from_secs(5));
    match &fs_server.transport {
        ServerTransport::Stdio { command, args, env, .. } => {
            assert_eq!(command, &PathBuf::from("npx"));
            assert_eq!(args.len(), 2);
            assert_eq!(env.get("DEBUG").map(String::as_str), Some("1"));
        }
        other => panic!("expected stdio transport, got {other:?}"),
    }
    match &config.servers[1].transport {
        ServerTransport::Sse { url, headers } => {
            assert_eq!(url, "http://localhost:8000/sse");
            assert_eq!(
                headers.get("Authorization").map(String::as_str),
                Some("Bearer token")
            );
        }
        other => panic!("expected sse transport, got {other:?}"),
    }
}

#[test]
fn loads_json_server_list() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        "servers.json",
        r#"{
  "servers": [
    { "name": "taylor", "script": "taylor.py" },
    { "name": "tools", "args": ["tools/server.js"] }
  ]
}"#,
    );

    let config = AppConfig::load(&path).expect("config loads");
    assert_eq!(config.client.model, "claude-sonnet-4-20250514");
    match &config.servers[0].transport {
        ServerTransport::Stdio { command, args, .. } => {
            assert_eq!(command, &PathBuf::from("python"));
            assert_eq!(args, &vec!["taylor.py".to_string()]);
        }
        other => panic!("expected stdio transport, got {other:?}"),
    }
    match &config.servers[1].transport {
        ServerTransport::Stdio { command, .. } => {
            assert_eq!(command, &PathBuf::from("node"));
        }
        other => panic!("expected stdio transport, got {other:?}"),
    }
}

#[test]
fn rejects_unsupported_extension() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(dir.path(), "servers.yaml", "servers: {}");
    let result = AppConfig::load(&path);
    assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
}

#[test]
fn rejects_malformed_files() {
    let dir = tempdir().expect("tempdir");
    let toml_path = write_config(dir.path(), "bad.toml", "[servers.fs\ncommand = ");
    assert!(matches!(
        AppConfig::load(&toml_path),
        Err(ConfigError::ParseToml { .. })
    ));

    let json_path = write_config(dir.path(), "bad.json", "{ \"servers\": ");
    assert!(matches!(
        AppConfig::load(&json_path),
        Err(ConfigError::ParseJson { .. })
    ));
}

#[test]
fn requires_an_enabled_server() {
    let dir = tempdir().expect("tempdir");
    let empty = write_config(dir.path(), "empty.toml", "[client]\nmodel = \"x\"\n");
    assert!(matches!(
        AppConfig::load(&empty),
        Err(ConfigError::NoServersConfigured)
    ));

    let disabled = write_config(
        dir.path(),
        "disabled.toml",
        "[servers.only]\ncommand = \"node\"\nenabled = false\n",
    );
    assert!(matches!(
        AppConfig::load(&disabled),
        Err(ConfigError::NoServersConfigured)
    ));
}

#[test]
fn rejects_url_combined_with_command() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        "mixed.toml",
        "[servers.mixed]\ncommand = \"node\"\nurl = \"http://localhost:1/sse\"\n",
    );
    assert!(matches!(
        AppConfig::load(&path),
        Err(ConfigError::InvalidServer { server, .. }) if server == "mixed"
    ));
}

#[test]
fn rejects_zero_timeout() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        "timeout.json",
        r#"{ "servers": { "slow": { "command": "node", "timeout_secs": 0 } } }"#,
    );
    assert!(matches!(
        AppConfig::load(&path),
        Err(ConfigError::InvalidServer { .. })
    ));
}

#[test]
fn script_argument_runs_legacy_single_server() {
    let config = LaunchTarget::from_arg("servers/taylor.py")
        .load()
        .expect("script config");
    assert_eq!(config.servers.len(), 1);
    assert_eq!(config.servers[0].name, LEGACY_SERVER_NAME);
    match &config.servers[0].transport {
        ServerTransport::Stdio { command, args, .. } => {
            assert_eq!(command, &PathBuf::from("python"));
            assert_eq!(args, &vec!["servers/taylor.py".to_string()]);
        }
        other => panic!("expected stdio transport, got {other:?}"),
    }

    let node = LaunchTarget::from_arg("server.js").load().expect("node script");
    assert!(matches!(
        &node.servers[0].transport,
        ServerTransport::Stdio { command, .. } if command == &PathBuf::from("node")
    ));

    assert!(matches!(
        LaunchTarget::from_arg("server.rb").load(),
        Err(ConfigError::UnsupportedScript { .. })
    ));
}
