//! HTTP error rendering for the admin API.

use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::WorkError;

/// Errors returned by admin API handlers.
#[derive(Error, Debug)]
pub enum WebUiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Work(#[from] WorkError),
}

impl WebUiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebUiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebUiError::Work(WorkError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            WebUiError::Work(WorkError::JobNotFound { .. }) => StatusCode::NOT_FOUND,
            WebUiError::Work(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            WebUiError::BadRequest(_) => "BAD_REQUEST",
            WebUiError::Work(WorkError::Connection(_)) => "BACKEND_UNAVAILABLE",
            WebUiError::Work(WorkError::JobNotFound { .. }) => "JOB_NOT_FOUND",
            WebUiError::Work(WorkError::Redis(_)) => "REDIS_ERROR",
            WebUiError::Work(WorkError::Json(_)) => "JSON_ERROR",
        }
    }
}

impl IntoResponse for WebUiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, error_code, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, error_code, "Request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

impl From<PathRejection> for WebUiError {
    fn from(rejection: PathRejection) -> Self {
        WebUiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for WebUiError {
    fn from(rejection: QueryRejection) -> Self {
        WebUiError::BadRequest(rejection.body_text())
    }
}
