//! Error types for dorm-daemon

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dorm_core::DormError;
use dorm_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Service construction error
    #[error("Service error: {0}")]
    Service(#[from] DormError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or rejected bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Domain error from the booking or identity services
    #[error(transparent)]
    Domain(#[from] DormError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Domain(err) => match err {
                DormError::InvalidInterval(_) => (StatusCode::BAD_REQUEST, "INVALID_INTERVAL"),
                DormError::SlotConflict(_) => (StatusCode::CONFLICT, "SLOT_CONFLICT"),
                DormError::NotFoundOrNotOwner => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                DormError::UnknownIdentity(_) | DormError::CredentialInvalid(_) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
                }
                DormError::StoreUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                }
                DormError::Credential(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }

        let error = match &self {
            // Backend detail stays in the log.
            ApiError::Domain(DormError::StoreUnavailable { operation, .. }) => {
                format!("store unavailable during {operation}")
            }
            ApiError::Domain(DormError::Credential(_)) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dorm_core::CredentialFault;
    use dorm_storage::IdentityId;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            status(DormError::InvalidInterval("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(DormError::SlotConflict("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(status(DormError::NotFoundOrNotOwner), StatusCode::NOT_FOUND);
        assert_eq!(
            status(DormError::StoreUnavailable {
                operation: "list_reservations",
                message: "pool timed out".to_string(),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(DormError::CredentialInvalid(CredentialFault::Expired)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(DormError::UnknownIdentity(IdentityId(3))),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(ApiError::Unauthorized("missing".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(ApiError::BadRequest("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
