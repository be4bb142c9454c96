//! Status and diagnostics endpoints of the API service.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::instrument;

use super::timestamp;
use crate::config::{
    API_KEY_SECRET, API_SERVICE_NAME, API_VERSION, DB_PASSWORD_SECRET, PLATFORM_REGISTRY,
    PLATFORM_RUNTIME,
};
use crate::promote::Environment;
use crate::secrets::SecretStatus;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub struct SecretsConfigured {
    db_password: bool,
    api_key: bool,
}

#[derive(Debug, Serialize)]
pub struct Architecture {
    containerized: bool,
    runtime: &'static str,
    container_registry: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ApiStatus {
    status: &'static str,
    service: &'static str,
    environment: Environment,
    environment_color: &'static str,
    project_id: Option<String>,
    secrets_configured: SecretsConfigured,
    architecture: Architecture,
    timestamp: String,
    version: &'static str,
}

/// Readiness detail: environment, secret availability and platform.
#[instrument(name = "status::status", skip(state))]
pub async fn status(State(state): State<ApiState>) -> Json<ApiStatus> {
    let runtime = &state.runtime;
    Json(ApiStatus {
        status: "operational",
        service: API_SERVICE_NAME,
        environment: runtime.environment,
        environment_color: runtime.environment.color(),
        project_id: runtime.project_id.clone(),
        secrets_configured: SecretsConfigured {
            db_password: state.secrets.is_loaded(DB_PASSWORD_SECRET),
            api_key: state.secrets.is_loaded(API_KEY_SECRET),
        },
        architecture: Architecture {
            containerized: true,
            runtime: PLATFORM_RUNTIME,
            container_registry: PLATFORM_REGISTRY,
        },
        timestamp: timestamp(),
        version: API_VERSION,
    })
}

#[derive(Debug, Serialize)]
pub struct RuntimeConfiguration {
    log_level: &'static str,
    debug_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct EnvInfo {
    environment: Environment,
    environment_color: &'static str,
    project_id: Option<String>,
    purpose: &'static str,
    url: String,
    configuration: RuntimeConfiguration,
    timestamp: String,
}

#[instrument(name = "status::env_info", skip(state))]
pub async fn env_info(State(state): State<ApiState>) -> Json<EnvInfo> {
    let runtime = &state.runtime;
    Json(EnvInfo {
        environment: runtime.environment,
        environment_color: runtime.environment.color(),
        project_id: runtime.project_id.clone(),
        purpose: runtime.environment.purpose(),
        url: runtime.platform_url(),
        configuration: RuntimeConfiguration {
            log_level: runtime.log_level.as_str(),
            debug_mode: runtime.environment.is_debug(),
        },
        timestamp: timestamp(),
    })
}

#[derive(Debug, Serialize)]
pub struct SecretsStatus {
    db_password: SecretStatus,
    api_key: SecretStatus,
}

#[derive(Debug, Serialize)]
pub struct SecretTest {
    environment: Environment,
    secrets_status: SecretsStatus,
    note: &'static str,
    timestamp: String,
}

/// Report whether secrets loaded, exposing at most a three-character preview.
#[instrument(name = "status::secret_test", skip(state))]
pub async fn secret_test(State(state): State<ApiState>) -> Json<SecretTest> {
    Json(SecretTest {
        environment: state.runtime.environment,
        secrets_status: SecretsStatus {
            db_password: state.secrets.status(DB_PASSWORD_SECRET),
            api_key: state.secrets.status(API_KEY_SECRET),
        },
        note: "Only showing first 3 characters for security",
        timestamp: timestamp(),
    })
}
