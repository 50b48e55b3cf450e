pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod lyrics;

pub use application::{catalog, chat, context, logger, orchestrator, registry, tooling};
pub use cli::Cli;
pub use config::AppConfig;
pub use domain::types;
pub use infrastructure::{model, rpc};

use application::logger::InteractionLogger;
use application::orchestrator::{Orchestrator, OrchestratorSettings};
use application::registry::RegistryError;
use application::tooling::TransportConnector;
use application::transcript::ConversationTranscript;
use config::{ConfigError, LaunchTarget};
use model::{AnthropicClient, ModelError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", cli::USAGE)]
    MissingTarget,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Chat(#[from] chat::ChatError),
}

impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Model(err) => err.user_message(),
            AppError::Registry(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    init_tracing();
    config::ensure_env_loaded();

    let Some(target) = cli.target.as_deref() else {
        return Err(AppError::MissingTarget);
    };
    let target = LaunchTarget::from_arg(target);
    debug!(?target, "CLI arguments parsed");
    let app_config = target.load()?;

    let logger = Arc::new(InteractionLogger::new(&app_config.client.log_file));
    logger.startup(
        "Client starting",
        json!({
            "model": app_config.client.model,
            "servers": app_config
                .servers
                .iter()
                .map(|server| json!({
                    "name": server.name,
                    "transport": server.transport_label(),
                    "enabled": server.enabled,
                }))
                .collect::<Vec<_>>(),
        }),
    );

    let provider = AnthropicClient::from_env().inspect_err(|err| {
        logger.error(None, "startup", &err.to_string());
    })?;
    info!(endpoint = provider.endpoint(), model = %app_config.client.model, "Model provider ready");

    let mut orchestrator = Orchestrator::new(
        provider,
        Arc::new(TransportConnector),
        Arc::clone(&logger),
        OrchestratorSettings::from(&app_config.client),
    );
    if let Some(path) = &app_config.client.transcript_file {
        orchestrator = orchestrator.with_transcript(ConversationTranscript::new(path));
    }

    if let Err(err) = orchestrator.connect_all(&app_config.servers).await {
        error!(%err, "No tool servers available");
        orchestrator.shutdown().await;
        return Err(err.into());
    }

    let result = chat::run(&mut orchestrator).await;
    let report = orchestrator.shutdown().await;
    info!(
        closed = report.closed.len(),
        failed = report.failed.len(),
        "Client execution finished"
    );
    result.map_err(AppError::from)
}

/// Installs the global subscriber once. Output goes to stderr so stdout stays
/// free for the chat prompt.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
