use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::promote::Environment;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No data provided")]
    NoData,

    #[error("The requested API endpoint does not exist")]
    NotFound { path: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NoData => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An [`AppError`] tagged with the environment it happened in.
///
/// Every API response names its environment, errors included.
#[derive(Debug)]
pub struct AppErrorResponse {
    pub error: AppError,
    pub environment: Environment,
}

impl IntoResponse for AppErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = match &self.error {
            AppError::NoData => serde_json::json!({
                "error": self.error.to_string(),
                "environment": self.environment,
            }),
            AppError::NotFound { path } => serde_json::json!({
                "error": "Not Found",
                "message": self.error.to_string(),
                "environment": self.environment,
                "path": path,
            }),
            AppError::Internal(_) => {
                tracing::error!(environment = %self.environment, "Internal error: {:?}", self.error);
                serde_json::json!({
                    "error": "Internal Server Error",
                    "message": "An unexpected error occurred",
                    "environment": self.environment,
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Attach the serving environment to an error result.
pub trait ResultExt<T> {
    fn in_environment(self, environment: Environment) -> Result<T, AppErrorResponse>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn in_environment(self, environment: Environment) -> Result<T, AppErrorResponse> {
        self.map_err(|error| AppErrorResponse { error, environment })
    }
}
