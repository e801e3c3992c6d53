//! Tank Battle Server - authoritative turn-based server for bot battles
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections for bots, observers and controllers
//! - The lobby that admits connections and starts games
//! - HTTP endpoints for health and session status

mod app;
mod config;
mod events;
mod game;
mod http;
mod lobby;
mod scoring;
mod session;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // SERVER_ADDR, BOT_SECRETS etc. may come from a .env in the working directory
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Tank Battle Server");
    info!(
        server_addr = %config.server_addr,
        default_game_type = %config.default_game_type,
        "Configuration loaded"
    );

    // The lobby and its first session live as long as the process
    let state = AppState::new(config.clone());
    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Accepting bots, observers and controllers on ws://{}/ws", addr);
    info!("Session status: http://{}/sessions", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Log filter from RUST_LOG, falling back to the configured level
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, closing connections");
        }
        _ = terminate => {
            info!("SIGTERM received, closing connections");
        }
    }
}
