//! Example MCP tool server over stdio exposing Taylor Swift lyrics tools.

use mcp_chat_client::init_tracing;
use mcp_chat_client::lyrics::{FETCH_TIMEOUT, LyricsClient, SONGS_API_BASE, TaylorTools};
use mcp_chat_client::rpc::{McpServer, ServerInfo};
use std::error::Error;
use tokio::io::{self, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let client = LyricsClient::new(SONGS_API_BASE, FETCH_TIMEOUT)?;
    let server = McpServer::new(
        ServerInfo::new("taylor", env!("CARGO_PKG_VERSION")),
        TaylorTools::new(client),
    )
    .with_instructions("Use exact song titles when looking up Taylor Swift lyrics.");

    server.serve(BufReader::new(io::stdin()), io::stdout()).await?;
    info!("taylor-server stopped");
    Ok(())
}
