//! Bombnet Server - Authoritative replication server
//!
//! This is the main entry point for the game server. It handles:
//! - The fixed-tick game loop that owns every replicated entity
//! - WebSocket connections bridged onto the in-process transport
//! - A health endpoint for monitoring

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bombnet::app::AppState;
use bombnet::config::Config;
use bombnet::game::presentation::LogPresentation;
use bombnet::game::GameServer;
use bombnet::http::build_router;
use bombnet::net::transport::channel_transport;
use bombnet::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Bombnet Server");
    info!("Server address: {}", config.server_addr);

    // Spawn the authoritative game loop
    let (hub, transport) = channel_transport();
    let server = GameServer::new(config.game.clone(), transport, Box::new(LogPresentation));
    let handle = server.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let game_task = tokio::spawn(server.run(shutdown_rx));

    // Create application state and router
    let state = AppState::new(config.clone(), hub, handle);
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the game loop and let it say goodbye to its connections
    let _ = shutdown_tx.send(true);
    game_task.await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
