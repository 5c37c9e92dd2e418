use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use payroll_core::devnet::ErrorBody;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid api key".to_string()),
            ApiError::Config(_) | ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

/// Log a storage failure and hide its detail from the caller.
pub fn internal(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "storage failure");
    ApiError::Internal
}
