use crate::services::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Storage(e) => storage_status(e),
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::Configuration(_)
        | StorageError::LocalIo { .. }
        | StorageError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::Connectivity(_) | StorageError::Backend(_) => StatusCode::BAD_GATEWAY,
        StorageError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::Validation(_) => StatusCode::BAD_REQUEST,
        StorageError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Storage(StorageError::Cancelled) => {
                tracing::info!("Request cancelled before completion");
                "Request cancelled".to_string()
            }
            AppError::Storage(e) if status.is_server_error() => {
                tracing::error!("Storage error: {:?}", e);
                match e {
                    StorageError::Configuration(_) | StorageError::LocalIo { .. } => {
                        "Internal Server Error".to_string()
                    }
                    _ => e.to_string(),
                }
            }
            AppError::Storage(e) => e.to_string(),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::Unauthorized(msg) | AppError::BadRequest(msg) | AppError::NotFound(msg) => {
                msg.clone()
            }
            AppError::Validation(e) => e.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
