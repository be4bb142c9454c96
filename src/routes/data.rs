//! Sample data endpoints.
//!
//! The payload differs per environment so a deployed revision can be told
//! apart at a glance.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::instrument;

use super::timestamp;
use crate::error::{AppError, AppErrorResponse, ResultExt};
use crate::promote::Environment;
use crate::state::ApiState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataItem {
    pub id: u32,
    pub name: String,
    pub value: u32,
    pub status: &'static str,
}

/// Three sample items labelled, valued and tagged per environment.
pub fn sample_items(environment: Environment) -> Vec<DataItem> {
    let (label, base, step, status) = match environment {
        Environment::Dev => ("DEV", 100, 100, "testing"),
        Environment::Qa => ("QA", 150, 100, "validation"),
        Environment::Production => ("PROD", 1000, 1000, "active"),
    };

    (1..=3u32)
        .map(|id| DataItem {
            id,
            name: format!("{} Item {}", label, id),
            value: base + step * (id - 1),
            status,
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct DataList {
    message: String,
    environment: Environment,
    items: Vec<DataItem>,
    total_items: usize,
    timestamp: String,
}

#[instrument(name = "data::list", skip(state))]
pub async fn list(State(state): State<ApiState>) -> Json<DataList> {
    let environment = state.runtime.environment;
    let items = sample_items(environment);
    Json(DataList {
        message: format!("Data from {} environment", environment),
        environment,
        total_items: items.len(),
        items,
        timestamp: timestamp(),
    })
}

#[derive(Debug, Serialize)]
pub struct DataReceived {
    message: &'static str,
    environment: Environment,
    received: serde_json::Value,
    status: &'static str,
    timestamp: String,
}

/// Accept a JSON document and echo it back.
///
/// Missing, unparsable and falsy (`null`, `false`, `0`, `{}`, `[]`, `""`)
/// bodies are all "no data".
#[instrument(name = "data::submit", skip(state, body), fields(bytes = body.len()))]
pub async fn submit(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<DataReceived>), AppErrorResponse> {
    let environment = state.runtime.environment;
    let received = parse_payload(&body).in_environment(environment)?;

    tracing::info!(%environment, "Received POST data");

    Ok((
        StatusCode::CREATED,
        Json(DataReceived {
            message: "Data received successfully",
            environment,
            received,
            status: "processed",
            timestamp: timestamp(),
        }),
    ))
}

fn parse_payload(body: &[u8]) -> Result<serde_json::Value, AppError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| AppError::NoData)?;
    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
    };
    if empty {
        Err(AppError::NoData)
    } else {
        Ok(value)
    }
}
