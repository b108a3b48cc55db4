use agent_task_orchestrator::{api::start_server, orchestrator::TaskOrchestrator, Config};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Agent Task Orchestrator - API Server");
    info!(
        port = config.api_port,
        primary = %config.backend.primary,
        fallbacks = config.backend.fallback_chain.len(),
        delegate = config.delegation.as_ref().map(|d| d.base_url.as_str()).unwrap_or("none"),
        "Configuration loaded"
    );

    let orchestrator = Arc::new(TaskOrchestrator::from_config(&config)?);
    let _janitor = orchestrator.spawn_janitor();

    info!("Orchestrator initialized");

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
