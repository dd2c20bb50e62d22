//! HTTP error mapping.
//!
//! Service-layer errors carry the detail; this module decides what leaks
//! to the client. Backend failures collapse to a generic message so paths
//! and connection strings never end up in responses.

use crate::services::file_service::StorageError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// An error ready to leave the process as an HTTP response.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_params", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidParams(msg) => Self::invalid_params(msg),
            StorageError::SessionNotFound => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                "upload session not found or expired",
            ),
            StorageError::FileNotFound => {
                Self::new(StatusCode::NOT_FOUND, "not_found", "file not found")
            }
            StorageError::HashMismatch { expected, actual } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "hash_mismatch",
                format!("hash mismatch: expected {expected}, got {actual}"),
            ),
            StorageError::Incomplete { received, expected } => Self::new(
                StatusCode::CONFLICT,
                "incomplete",
                format!("upload incomplete: {received} of {expected} chunks received"),
            ),
            StorageError::SizeMismatch { declared, actual } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "size_mismatch",
                format!("size mismatch: declared {declared} bytes, assembled {actual}"),
            ),
            StorageError::RangeNotSatisfiable { size } => Self::new(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "range_not_satisfiable",
                format!("requested range not satisfiable for object of {size} bytes"),
            ),
            StorageError::Assembly(err) => {
                error!("chunk assembly failed: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "assembly_io",
                    "failed to assemble uploaded chunks",
                )
            }
            StorageError::StoreWrite(err) => {
                error!("tier write failed: {err}");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "store_write_failed",
                    "failed to write object to the storage tier",
                )
            }
            StorageError::Tier(crate::services::tiers::TierError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", "file not found")
            }
            StorageError::Tier(err) => {
                error!("tier error: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error",
                )
            }
            StorageError::Session(err) => {
                error!("session store error: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error",
                )
            }
            StorageError::Db(err) => {
                error!("database error: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error",
                )
            }
            StorageError::Io(err) => {
                error!("io error: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error",
                )
            }
        }
    }
}
