//! Signal handling for graceful shutdown.

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C). If a handler cannot be
/// installed, only the remaining signal is awaited.
pub async fn shutdown_signal() {
    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Failed to install SIGINT handler");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            sigint.recv().await;
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        (Err(term), Err(int)) => {
            tracing::error!(sigterm = %term, sigint = %int, "No signal handler could be installed");
            std::future::pending::<()>().await;
        }
    }
}

/// Waits for a shutdown signal, then flips `shutdown_tx` so background
/// tasks stop alongside the HTTP server.
pub async fn shutdown_and_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}
