// ============================================================================
// API Gateway Service
// ============================================================================
//
// Single entry point for all client requests. Loads configuration, the
// route table and the static service registry, then serves until Ctrl-C or
// SIGTERM.
//
// Lifecycle:
// - SIGHUP re-reads the routes and services files and swaps them in
// - Shutdown stops accepting, drains in-flight requests, stops the health
//   checker and awaits outstanding background tasks
//
// ============================================================================

use anyhow::{Context, Result};
use api_gateway::config::{
    DiscoveryMode, GatewayConfig, ServicesFile, load_routes, load_services,
};
use api_gateway::gateway::{GatewayRouter, GatewayState, router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    init_tracing(&config);

    info!("=== API Gateway Starting ===");
    info!("Bind address: {}", config.bind_address);
    info!("Routes file: {}", config.routes_file);
    info!("Discovery: {:?}", config.discovery.mode);

    let routes = load_routes(&config.routes_file)?.routes;
    let services = read_services(&config)?;

    let state = GatewayRouter::builder(config.clone())
        .routes(routes)
        .services(services)
        .build()
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    state.spawn_health_checker(shutdown_rx.clone());
    spawn_reload_listener(state.clone(), shutdown_rx);

    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .context("Failed to bind to address")?;

    info!("API Gateway listening on {}", config.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Failed to start server")?;

    info!("Server stopped accepting connections, finishing background work");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let aborted = state.tasks.shutdown(grace).await;
    if aborted > 0 {
        warn!(aborted = aborted, "Background tasks did not finish within the grace period");
    }

    info!("=== API Gateway Stopped ===");
    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let (plain, json) = if config.logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(plain)
        .with(json)
        .init();
}

/// The services file is optional with dynamic discovery, and an absent file
/// under static discovery means "no services yet"
fn read_services(config: &GatewayConfig) -> Result<ServicesFile> {
    if Path::new(&config.services_file).exists() {
        return load_services(&config.services_file);
    }
    if config.discovery.mode == DiscoveryMode::Static {
        warn!(
            path = %config.services_file,
            "Services file not found, starting with an empty static registry"
        );
    }
    Ok(ServicesFile::default())
}

fn reload(state: &GatewayState) -> Result<usize> {
    let routes = load_routes(&state.config.routes_file)?.routes;
    let services = read_services(&state.config)?;
    state.reload(&routes, &services)
}

#[cfg(unix)]
fn spawn_reload_listener(state: Arc<GatewayState>, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, hot reload disabled");
            return;
        }
    };

    let tasks = state.tasks.clone();
    tasks.spawn("config_reload", async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, reloading configuration");
                    if let Err(e) = reload(&state) {
                        error!(error = %e, "Configuration reload failed, keeping previous configuration");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_state: Arc<GatewayState>, _shutdown: watch::Receiver<bool>) {
    info!("Hot reload via SIGHUP is only available on unix");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
