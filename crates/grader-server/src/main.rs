//! Grader server binary.

use std::sync::Arc;

use anyhow::Context;
use grader_server::store::PgIdentityStore;
use grader_server::{create_router, db, AppState, Config};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let store = Arc::new(PgIdentityStore::new(pool));
    let state = AppState::new(store, config.cache.clone(), config.client_cert_header.clone());
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Grader server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
