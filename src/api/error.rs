//! Error responses for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::execution::LifecycleError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let status = match &err {
            LifecycleError::AlreadyRunning { .. } | LifecycleError::NotRunning { .. } => {
                StatusCode::CONFLICT
            }
            LifecycleError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            LifecycleError::StartFailed { .. } | LifecycleError::StopFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            LifecycleError::TaskAborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "data": null,
            "meta": { "error": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}
