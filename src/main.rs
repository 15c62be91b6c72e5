use axum::routing::{delete, get, post, put};
use axum::Router;
use tracing_subscriber::EnvFilter;

use pulse_search::api;
use pulse_search::config::Config;
use pulse_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Embedding provider: {} (dimension {})",
        config.embedding.provider,
        config.embedding.dimension
    );

    let state = AppState::new(config.clone())?;
    state.spawn_background();

    let app = Router::new()
        .route("/api/content", post(api::content::submit_content))
        .route("/api/content/{id}", get(api::content::get_content))
        .route("/api/content/{id}", put(api::content::update_content))
        .route("/api/content/{id}", delete(api::content::remove_content))
        .route("/api/search", post(api::search::search))
        .route("/api/suggest", get(api::search::suggest))
        .route("/api/trending", get(api::search::trending))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
