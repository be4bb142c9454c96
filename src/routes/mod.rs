//! HTTP routers for the two services.
//!
//! Each service gets its own router; neither knows the other's routes. The
//! platform's dispatch table decides which one a request reaches.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod data;
pub mod health;
pub mod status;

use axum::{
    extract::{OriginalUri, State},
    http::{Method, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use chrono::{SecondsFormat, Utc};
use http::header::{HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{StaticSiteConfig, CACHE_CONTROL_API, CACHE_CONTROL_STATIC};
use crate::dispatch::ServiceKind;
use crate::error::{AppError, AppErrorResponse};
use crate::http::static_files::create_static_service;
use crate::middleware::request_id_layer;
use crate::state::ApiState;

/// RFC 3339 timestamp for response bodies.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// CORS policy for `/api/*`: any origin, the usual verbs, JSON and bearer headers.
fn api_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

/// JSON 404 for unknown API paths.
async fn api_not_found(State(state): State<ApiState>, OriginalUri(uri): OriginalUri) -> AppErrorResponse {
    AppErrorResponse {
        error: AppError::NotFound {
            path: uri.path().to_string(),
        },
        environment: state.runtime.environment,
    }
}

/// Creates the API service router.
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health::api_health))
        .route("/api/status", get(status::status))
        .route("/api/env-info", get(status::env_info))
        .route("/api/secret-test", get(status::secret_test))
        .route("/api/data", get(data::list).post(data::submit))
        .fallback(api_not_found)
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_API),
        ))
        .layer(api_cors())
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn_with_state(ServiceKind::Api, request_id_layer))
}

/// Assets are cached; misses and errors are not, so a file added by a new
/// revision is visible as soon as that revision is live.
fn static_cache_control(response: &Response) -> Option<HeaderValue> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        Some(HeaderValue::from_static(CACHE_CONTROL_STATIC))
    } else {
        Some(HeaderValue::from_static(CACHE_CONTROL_API))
    }
}

/// Creates the static content service router.
pub fn create_static_router(site: &StaticSiteConfig) -> Router {
    // Health check - no caching, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health));

    let asset_routes = Router::new()
        .fallback_service(create_static_service(site))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            static_cache_control,
        ));

    Router::new()
        .merge(health_routes)
        .merge(asset_routes)
        .layer(middleware::from_fn_with_state(ServiceKind::Static, request_id_layer))
}
