use clap::Parser;
use mcp_chat_client::{Cli, run};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err.user_message());
        std::process::exit(1);
    }
    Ok(())
}
