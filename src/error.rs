//! Client-facing error type for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::models::policy::RejectionReason;
use crate::services::coordinator::CoordinatorError;
use crate::services::render::BackendError;
use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Prompt rejected: {0} content not allowed")]
    PolicyRejection(RejectionReason),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("request id '{0}' already has an active job")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PolicyRejection(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Backend(BackendError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Backend(BackendError::BackendRejected(_)) => StatusCode::BAD_REQUEST,
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::PolicyRejection(_) => "policy_rejection",
            AppError::Validation(_) => "validation_error",
            AppError::Duplicate(_) => "duplicate_request",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Backend(BackendError::Unreachable(_)) => "backend_unreachable",
            AppError::Backend(BackendError::Timeout(_)) => "backend_timeout",
            AppError::Backend(BackendError::BackendRejected(_)) => "backend_rejected",
            AppError::Backend(BackendError::BackendFault(_)) => "backend_fault",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Duplicate(id) => AppError::Duplicate(id),
            CoordinatorError::NotFound(id) => AppError::NotFound(format!("job '{id}'")),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidName(_) => {
                AppError::NotFound("Image".to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string().trim().replace('\n', "; "))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let mut body = json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });
        if let AppError::PolicyRejection(reason) = &self {
            body["reason"] = json!(reason);
        }

        (status, Json(body)).into_response()
    }
}
