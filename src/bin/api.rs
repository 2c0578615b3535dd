use finance_assistant_graph::{agent::build_from_config, api::start_server, config::AppConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    let config = AppConfig::from_env()?;

    if config.openai_api_key.is_empty() {
        eprintln!("⚠️  OPENAI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
    }

    info!("🚀 Finance Assistant - API Server");
    info!("📍 Port: {}", config.port);

    let graph = Arc::new(build_from_config(&config).await?);

    info!("✅ Graph initialized");
    info!("📡 Starting API server...");

    start_server(graph, config.port).await?;

    Ok(())
}
