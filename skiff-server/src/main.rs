//! Skiff server binary: configuration, store connection, engine wiring,
//! background jobs, filesystem watcher, and the HTTP listener.

mod api;
mod handlers;
mod infra;
mod jobs;
mod routes;
mod users;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skiff_core::{Database, TreeWatcher, WatchContext};

use infra::app_state::AppState;
use infra::config::{Cli, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;
    info!(
        "starting skiff-server on {}:{} (data root {})",
        config.host,
        config.port,
        config.data_root.display()
    );
    if let Some(external_url) = &config.external_url {
        info!("public base URL: {external_url}");
    }

    let db = Database::connect(&config.database_url).await?;
    let state = AppState::build(config, db);

    // The tree layout must exist before anything watches or serves it.
    for dir in [
        state.resolver.users_root(),
        state.resolver.shared_root(),
        state.resolver.trash_root(),
        state.resolver.uploads_root(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    // Settings snapshot up front so the first requests do not race it.
    state.settings.refresh().await.ok();

    let watcher = TreeWatcher::spawn(WatchContext {
        resolver: state.resolver.clone(),
        hub: state.hub.clone(),
        audit: state.audit.clone(),
        locks: state.db.locks.clone(),
        users: state.db.users.clone(),
        correlator: state.correlator.clone(),
        web_origin: state.web_origin.clone(),
    })?;

    jobs::spawn_all(&state);

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {addr}");

    let router = routes::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    watcher.shutdown();
    warn!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received");
}
