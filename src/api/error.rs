use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Deliberately carries no detail
    #[error("unauthorized")]
    Unauthorized,

    #[error("missing scope: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        // Internal detail stays in the log; clients get the category
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(detail, "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: self.code(),
            message,
        };

        if let ApiError::RateLimited { retry_after_secs } = self {
            return (
                status,
                [(axum::http::header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!(body)),
            )
                .into_response();
        }

        (status, Json(json!(body))).into_response()
    }
}

impl From<crate::ledger::LedgerError> for ApiError {
    fn from(value: crate::ledger::LedgerError) -> Self {
        match value {
            crate::ledger::LedgerError::Duplicate(id) => ApiError::Conflict(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(value: crate::storage::StorageError) -> Self {
        match value {
            crate::storage::StorageError::NotFound(reference) => ApiError::NotFound(reference),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
