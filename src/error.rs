use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("request body exceeds the upload limit")]
    PayloadTooLarge,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("upload error: {0}")]
    Upload(#[from] std::io::Error),
}

impl AppError {
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("missing required field `{}`", field))
    }

    pub fn invalid_field(field: &str, reason: impl std::fmt::Display) -> Self {
        Self::Validation(format!("invalid `{}`: {}", field, reason))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Storage(_) | AppError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "internal server error".to_string()
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
