use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

pub const STALE_REQUEST_MESSAGE: &str = "this request was already decided, please refresh";

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
    #[error("this request was already decided, please refresh ({0})")]
    StaleRequest(String),
    #[error("unknown geographic unit: {0}")]
    UnknownGeographicUnit(String),
    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_workflow(message: impl Into<String>) -> Self {
        Self::InvalidWorkflow(message.into())
    }

    pub fn stale(request_id: impl Into<String>) -> Self {
        Self::StaleRequest(request_id.into())
    }

    pub fn unknown_unit(message: impl Into<String>) -> Self {
        Self::UnknownGeographicUnit(message.into())
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::NotificationDelivery(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::InvalidWorkflow(_) => "invalid_workflow",
            AppError::StaleRequest(_) => "stale_request",
            AppError::UnknownGeographicUnit(_) => "unknown_geographic_unit",
            AppError::NotificationDelivery(_) => "notification_delivery",
            AppError::Token(_) => "token",
            AppError::Database(_) => "database",
            AppError::Serialization(_) => "serialization",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidWorkflow(_) => StatusCode::BAD_REQUEST,
            AppError::StaleRequest(_) => StatusCode::CONFLICT,
            AppError::UnknownGeographicUnit(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotificationDelivery(_) => StatusCode::BAD_GATEWAY,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let payload = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_message_is_user_facing() {
        let err = AppError::stale("req-1");
        assert!(err.to_string().starts_with(STALE_REQUEST_MESSAGE));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "stale_request");
    }

    #[test]
    fn denial_maps_to_forbidden() {
        let err = AppError::forbidden("missing DOCUMENT_APPROVE");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().starts_with("access denied"));
    }
}
