//! Liveness probes for both services.
//!
//! The static service answers a plain `ok` at `/health`; the API service
//! answers `/api/health` with its identity and environment. Both only check
//! that the process can serve HTTP.

use axum::{extract::State, Json};
use serde::Serialize;

use super::timestamp;
use crate::config::{API_SERVICE_NAME, API_VERSION};
use crate::promote::Environment;
use crate::state::ApiState;

/// Static service liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct ApiHealth {
    status: &'static str,
    service: &'static str,
    environment: Environment,
    project: Option<String>,
    timestamp: String,
    version: &'static str,
}

/// API service liveness probe.
pub async fn api_health(State(state): State<ApiState>) -> Json<ApiHealth> {
    Json(ApiHealth {
        status: "healthy",
        service: API_SERVICE_NAME,
        environment: state.runtime.environment,
        project: state.runtime.project_id.clone(),
        timestamp: timestamp(),
        version: API_VERSION,
    })
}
