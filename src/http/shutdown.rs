//! Graceful shutdown and signal handling.
//!
//! The platform stops old revisions with SIGTERM once a new one is live;
//! in-flight requests are drained before the process exits.

use std::time::Duration;

use axum_server::Handle;

/// Time allowed for in-flight requests after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Setup graceful shutdown on SIGTERM and SIGINT.
///
/// When either signal is received, the server will:
/// 1. Stop accepting new connections
/// 2. Wait for existing connections to complete
/// 3. Shutdown gracefully
pub fn setup_shutdown_handler(handle: Handle) {
    tokio::spawn(async move {
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
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        tracing::info!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Graceful shutdown initiated, waiting for connections to close"
        );
    });
}
