//! API Error Handling
//!
//! Errors of the store-management endpoints. Run endpoints never use these;
//! they always answer with a `TransactionResult`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use replicant_store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    StoreError(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => {
                ApiError::NotFound(format!("Transaction {} not found", name))
            }
            other => ApiError::StoreError(other),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
