use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use coordinator_api::ApiState;
use coordinator_core::config::{self, ConfigOverrides};
use coordinator_core::store::memory::MemoryStore;
use coordinator_core::store::postgres::PgStore;
use coordinator_core::store::Store;
use coordinator_core::Coordinator;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI argument parsing is out of scope (spec §4 "CLI and config file
/// parsing is not a goal"); every override comes from the environment
/// instead, mirroring how `COORD__`-prefixed variables already layer onto
/// the embedded defaults inside `coordinator_core::config`.
fn overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        config_path: std::env::var("COORD_CONFIG_PATH").ok().map(Into::into),
        server_host: std::env::var("COORD_SERVER_HOST").ok(),
        server_port: std::env::var("COORD_SERVER_PORT").ok().and_then(|v| v.parse().ok()),
        database_url: std::env::var("COORD_DATABASE_URL").ok(),
        log_level: std::env::var("COORD_LOG_LEVEL").ok(),
        log_format: std::env::var("COORD_LOG_FORMAT").ok(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load(overrides_from_env()).context("failed to load configuration")?;
    init_tracing(&config.observability.log_level, &config.observability.log_format);

    let store: Arc<dyn Store> = if std::env::var("COORD_STORE").as_deref() == Ok("memory") {
        warn!("COORD_STORE=memory: running against an in-process store, data does not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            PgStore::connect(&config.database.url, config.database.max_connections)
                .await
                .context("failed to connect to the database")?,
        )
    };

    let coordinator = Arc::new(Coordinator::new(store, &config));
    let background_tasks = coordinator.spawn_background_tasks();
    info!(tasks = background_tasks.len(), "background tasks started");

    let state = ApiState::new(coordinator, config.dispatch.request_deadline());
    let router = coordinator_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.host, config.server.port))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "coordinator API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("coordinator API server exited unexpectedly")?;

    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = if log_format == "json" {
        tracing::subscriber::set_global_default(subscriber.json().finish())
    } else {
        tracing::subscriber::set_global_default(subscriber.compact().finish())
    };
    if result.is_err() {
        // Already initialised by an embedding binary (e.g. a test harness); ignore.
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received, stopping coordinator API");
    } else {
        warn!("failed to listen for Ctrl+C shutdown signal");
    }
}
