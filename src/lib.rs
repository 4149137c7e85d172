//! robotmaestro -- run orchestration for a remote Robot Framework backend.
//!
//! This crate provides the core library for rebuilding execution trees from
//! runner console output, driving test runs and dependency installs through
//! their start/poll/finalize lifecycle, and keeping a history of finished runs.

pub mod api;
pub mod backend;
pub mod config;
pub mod execution;
pub mod history;
pub mod logparse;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::state::AppState;
use crate::backend::HttpBackend;
use crate::config::AppConfig;

/// Open storage and connect the lifecycles to the configured backend.
pub fn open(config: &AppConfig) -> Result<AppState> {
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;
    let backend = Arc::new(HttpBackend::new(
        &config.backend.url,
        config.backend.request_timeout(),
    )?);
    Ok(AppState::new(pool, backend, config.poller.interval()))
}

/// Start the robotmaestro API server and run until Ctrl-C.
pub async fn serve(config: &AppConfig, bind: &str) -> Result<()> {
    let state = open(config)?;
    let app = api::router(state.clone());

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(%addr, backend = %config.backend.url, "robotmaestro listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    state.shutdown().await;
    Ok(())
}
