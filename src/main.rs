mod agent;
mod config;
mod errors;
mod models;
mod routes;
mod service;

use std::sync::Arc;

use tracing::{error, info};

use crate::agent::{ChatModel, OpenAiChatModel};
use crate::config::Config;
use crate::service::relay_service::RelayService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "home_repair_assistant=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let model: Option<Arc<dyn ChatModel>> = match config.api_key.as_deref() {
        Some(key) => Some(Arc::new(OpenAiChatModel::new(key, &config.api_base_url, &config.model)?)),
        None => {
            error!("OPENAI_API_KEY is not set; chat requests will fail until it is configured");
            None
        }
    };
    let relay = RelayService::new(model, config.image_strategy);

    info!(
        model = %config.model,
        base_url = %config.api_base_url,
        image_strategy = config.image_strategy.as_str(),
        "Prompt relay ready"
    );

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, routes::router(relay)).await?;
    Ok(())
}
