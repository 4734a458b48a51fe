//! Stride Race Back binary entrypoint wiring REST, WebSocket, and queue-store layers.

use std::{env, net::SocketAddr};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod routes;
mod services;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_config = config::AppConfig::load();
    let app_state = AppState::new(app_config);

    spawn_queue_store_supervisor(app_state.clone());
    tokio::spawn(services::matchmaking::run(app_state.clone()));
    tokio::spawn(services::timeout::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Keep a Redis-backed queue store connected, entering degraded mode while it
/// is unreachable.
#[cfg(feature = "redis-store")]
fn spawn_queue_store_supervisor(state: state::SharedState) {
    use std::sync::Arc;

    use dao::queue_store::{QueueStore, redis::RedisQueueStore};

    let url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    tokio::spawn(services::storage_supervisor::run(state, move || {
        let url = url.clone();
        async move {
            let store = RedisQueueStore::connect(&url).await?;
            Ok(Arc::new(store) as Arc<dyn QueueStore>)
        }
    }));
}

/// Without the Redis feature a single-instance in-memory queue is installed
/// immediately; there is nothing to supervise.
#[cfg(not(feature = "redis-store"))]
fn spawn_queue_store_supervisor(state: state::SharedState) {
    use std::sync::Arc;

    use dao::queue_store::memory::MemoryQueueStore;

    tokio::spawn(async move {
        state
            .install_queue_store(Arc::new(MemoryQueueStore::new()))
            .await;
        info!("in-memory queue store installed");
    });
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
