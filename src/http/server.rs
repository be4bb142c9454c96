//! HTTP server startup logic.

use std::net::SocketAddr;

use axum::Router;
use axum_server::Handle;

use crate::dispatch::ServiceKind;

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address '{0}'")]
    Address(String),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Serve `app` for `service` on `host:port`.
///
/// This function blocks until the server shuts down.
pub async fn start_server(
    app: Router,
    service: ServiceKind,
    host: &str,
    port: u16,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| ServerError::Address(format!("{}:{}", host, port)))?;

    let handle = Handle::new();
    shutdown::setup_shutdown_handler(handle.clone());

    tracing::info!(%addr, %service, "Starting HTTP server");

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    tracing::info!(%service, "HTTP server stopped");
    Ok(())
}
