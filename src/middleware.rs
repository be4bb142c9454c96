//! Request correlation middleware.
//!
//! The platform edge stamps each request it dispatches with an
//! `x-request-id`; when present it is reused so edge and service logs line
//! up, otherwise a UUID v4 is generated. The id is echoed back on the
//! response and every log line inside the request span carries it together
//! with the service that answered.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch::ServiceKind;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest inbound id accepted before a fresh one is generated.
const MAX_INBOUND_ID_LEN: usize = 128;

fn inbound_request_id(request: &Request) -> Option<String> {
    let value = request.headers().get(&REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let acceptable = !value.is_empty()
        && value.len() <= MAX_INBOUND_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    acceptable.then(|| value.to_string())
}

/// Opens the request span. Install as the outermost layer of a service router.
pub async fn request_id_layer(
    State(service): State<ServiceKind>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = inbound_request_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        service = %service,
        method = %request.method(),
        path = %request.uri().path(),
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    async move {
        let mut response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("duration_ms", duration_ms);

        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), duration_ms, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), duration_ms, "Request completed");
        }

        // Inbound ids are validated ASCII and generated ids are UUIDs
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}
