//! Error taxonomy shared by the storage adapter, H-file handle, planners, and
//! HTTP handlers.
//!
//! Every failure a request can surface maps onto exactly one variant, and the
//! variant alone decides the HTTP status. Handlers never hand-pick status
//! codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Application error. `Display` output is what clients see in the `error`
/// field of the JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Object key absent in the store, or internal path absent in the H-file.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or out-of-range selection parameters.
    #[error("{0}")]
    InvalidSelection(String),

    /// A dataset-only operation was asked about a group (or vice versa).
    #[error("{0}")]
    Kind(String),

    /// Selection would exceed a hard element ceiling.
    #[error("{0}")]
    CapExceeded(String),

    /// Object store transport failure.
    #[error("object store error: {0}")]
    Backend(String),

    /// Everything unexpected: corrupt container bytes, unsupported filters,
    /// arithmetic that should have been prevented by validation.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidSelection(_) | AppError::Kind(_) | AppError::CapExceeded(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Backend(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {err}"))
    }
}
