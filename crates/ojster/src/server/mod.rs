//! Decryption server: Unix socket listener, routing, and middleware.
//!
//! # Responsibilities
//! - Bind the Unix socket and serve HTTP/1.1 on it.
//! - Define the Axum router with all routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Select the unsealing strategy (in-process or delegated subprocess).

pub mod handlers;
pub mod listener;
pub mod middleware;
pub mod router;
pub mod state;
pub mod strategy;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use state::AppState;
use strategy::Strategy;

/// Run the server until SIGINT or SIGTERM, then remove the socket.
///
/// # Errors
///
/// Returns an error if the tmpfs check fails or the socket cannot be bound.
pub async fn run(cfg: &Config, strategy: Strategy) -> Result<()> {
    if cfg.require_tmpfs {
        listener::ensure_tmpfs(&std::env::temp_dir())?;
    }

    let mode = match &strategy {
        Strategy::Direct => "direct",
        Strategy::Delegated { .. } => "delegated",
    };

    let unsealer = strategy::build(
        strategy,
        cfg.private_key_file.clone(),
        cfg.subprocess_timeout(),
    );
    let state = AppState::new(unsealer, cfg.max_body_bytes);
    let router = router::build(state, middleware::request_timeout(cfg.subprocess_timeout()));

    let socket = listener::bind(&cfg.socket_path)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %cfg.socket_path.display(),
        mode,
        "ojster server listening"
    );

    listener::serve(socket, router, shutdown_signal()).await;

    if let Err(e) = std::fs::remove_file(&cfg.socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove socket on shutdown");
        }
    }
    info!("ojster server stopped");
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
