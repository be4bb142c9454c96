//! Frontdoor: deployment logic for a two-service web property.
//!
//! A static frontend and an API backend sit behind one host. This crate
//! holds the rules that tie them together (the path dispatch table, the
//! per-service pipeline triggers and the per-environment promotion profiles)
//! and the two services themselves.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod middleware;
pub mod pipeline;
pub mod promote;
pub mod routes;
pub mod secrets;
pub mod state;
pub mod trigger;

pub use config::{AppConfig, ConfigError, Manifest, RuntimeEnv};
pub use dispatch::{DispatchTable, RouteRule, ServiceKind};
pub use promote::{Environment, ServiceDeployment};
pub use trigger::{TriggerPlan, TriggerRule, TriggerSet};
