//! Route Cache demo server
//!
//! Serves a small origin through the response cache, with admin endpoints
//! for stats and invalidation.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use route_cache::{create_router, spawn_cleanup_task, AppState, Cache, Config};

/// Main entry point for the demo server.
///
/// # Startup Sequence
/// 1. Load configuration from environment variables and the options file
/// 2. Initialize tracing subscriber for logging
/// 3. Create the cache and connect its store
/// 4. Start background expiry sweep task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let options = config
        .load_cache_options()
        .context("failed to load cache options")?;

    // RUST_LOG wins; otherwise `debug` in the options raises the crate level
    let default_filter = if options.debug {
        "route_cache=debug,tower_http=debug"
    } else {
        "route_cache=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Route Cache server");
    info!(
        "Configuration loaded: port={}, cleanup_interval={}s, options={:?}",
        config.server_port, config.cleanup_interval, config.cache_config
    );

    let cache = Arc::new(Cache::new(&options).await.context("failed to create cache")?);
    info!("Cache initialized with {} store", cache.current_cache_type());

    let cleanup_handle = spawn_cleanup_task(cache.clone(), config.cleanup_interval);
    info!("Background expiry sweep started");

    let app = create_router(AppState::new(cache));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cleanup_handle.abort();
    warn!("Expiry sweep task aborted");
}
