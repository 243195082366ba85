use anyhow::Result;
use clap::Parser;
use spreadsheet_agent::config::{CliArgs, ServerConfig};
use spreadsheet_agent::llm::{ChatModel, GeminiClient};
use spreadsheet_agent::server;
use spreadsheet_agent::session::{SessionStore, spawn_sweeper};
use spreadsheet_agent::state::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = CliArgs::parse();
    let config = Arc::new(ServerConfig::from_args(args)?);
    config.ensure_temp_root()?;

    // No live model, no server.
    let model = GeminiClient::probe(
        &config.api_key,
        &config.model_candidates,
        config.model_timeout,
    )
    .await?;
    info!(model = %model.model_name(), "language model ready");

    let store = Arc::new(SessionStore::new(config.session_timeout));
    spawn_sweeper(store.clone(), config.sweep_interval);

    let state = Arc::new(AppState::new(config, store, Arc::new(model)));
    server::run(state).await
}
