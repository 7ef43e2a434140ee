use anyhow::Context;
use server::catalog::ChallengeCatalog;
use server::config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env();

    let catalog = match &config.challenges_path {
        Some(path) => ChallengeCatalog::load(path)?,
        None => ChallengeCatalog::builtin().context("Built-in challenge is invalid")?,
    };
    tracing::info!("Loaded {} daily challenge(s)", catalog.len());

    match &config.stockfish_path {
        Some(path) => tracing::info!("Bot moves from engine at {path}"),
        None => tracing::info!("STOCKFISH_PATH not set - bot moves must be supplied by the client"),
    }

    let addr = format!("{}:{}", config.host, config.port);
    let app = server::app(config, catalog);

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
