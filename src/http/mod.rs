//! HTTP server plumbing shared by both services.
//!
//! TLS is terminated at the platform edge, so services listen on plain HTTP.
//! The server includes:
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Static asset serving for the frontend service

mod server;
mod shutdown;
pub mod static_files;

pub use server::{start_server, ServerError};
