//! Gitevents Web Server - version-control webhook receiver.
//!
//! This binary:
//! - Receives push and pull request webhooks
//! - Verifies their signatures
//! - Stores normalized events idempotently
//! - Serves the stored events back, newest first

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gitevents::web::is_signature_verification_enabled;
use gitevents::{build_router, store, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    let signing_enabled = is_signature_verification_enabled(&config.webhook_secret);
    info!(
        port = config.port,
        signature_verification = signing_enabled,
        database_max_connections = config.database_max_connections,
        database_connect_timeout_ms = config.database_connect_timeout_ms,
        "config_loaded"
    );
    if !signing_enabled {
        warn!("webhook_secret_not_configured_accepting_unsigned_deliveries");
    }

    // Create the event store (connects lazily)
    let store = store::connect(&config).context("Failed to create event store")?;

    // Create application state
    let state = AppState::new(config.clone(), store.clone());

    // Build the router
    let app = build_router(state).layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Close store connections
    store.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
