use clap::Parser;

pub const USAGE: &str = "Usage: mcp-chat <config.json|config.toml|server_script.py>";

#[derive(Parser, Debug)]
#[command(
    name = "mcp-chat",
    version,
    about = "Chat with a model that can call tools on several MCP servers"
)]
pub struct Cli {
    /// Server configuration file (.json, .toml, .tml) or a single server script (.py, .js)
    #[arg()]
    pub target: Option<String>,
}
