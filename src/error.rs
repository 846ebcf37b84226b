//! Unified error handling for the HTTP surface.
//!
//! Layer-specific errors (`DatabaseError`, `ProviderError`, `CryptoError`)
//! convert into a single `AppError` with a proper HTTP status code and a
//! standardized JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::database::error::DatabaseError;
use crate::providers::error::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("crypto integrity fault")]
    Crypto(#[from] CryptoError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Provider { .. } => StatusCode::BAD_GATEWAY,
            AppError::Storage(e) => {
                if e.is_not_found() {
                    StatusCode::NOT_FOUND
                } else if e.is_invalid() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            AppError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Provider { .. } => "PROVIDER_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Crypto(_) => "INTEGRITY_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider { retryable, .. } => *retryable,
            AppError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    fn user_message(&self) -> String {
        match self {
            // Crypto failures must not leak ciphertext or key details.
            AppError::Crypto(_) => "internal integrity error".to_string(),
            AppError::Storage(e) if !e.is_not_found() && !e.is_invalid() => {
                "storage unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::Validation { message, .. } => AppError::Validation(message.clone()),
            ProviderError::Unsupported { .. } => AppError::Validation(err.to_string()),
            ProviderError::BadPayload { message } => AppError::Validation(message.clone()),
            ProviderError::BadSignature { message } => AppError::Unauthorized(message.clone()),
            // Decrypt failures are an integrity fault on our side, not the
            // provider's; surface as 500 without the detail.
            ProviderError::Crypto { message } => {
                tracing::error!(error = %message, "credential decrypt failed");
                AppError::Internal("internal integrity error".to_string())
            }
            _ => AppError::Provider {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

/// Standardized error response structure returned for every failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: Some(error.is_retryable()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = ?self, status = %status.as_u16(), "server error");
        } else {
            tracing::warn!(error = ?self, status = %status.as_u16(), "client error");
        }

        (status, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::{DatabaseError, DatabaseErrorKind};

    #[test]
    fn status_code_mapping_is_correct() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("no key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Provider {
                message: "stk failed".into(),
                retryable: true
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        let nf = DatabaseError::new(DatabaseErrorKind::NotFound {
            entity: "Tenant".into(),
            id: "1".into(),
        });
        assert_eq!(AppError::Storage(nf).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn crypto_errors_do_not_leak_details() {
        let err = AppError::Crypto(CryptoError::Corrupt("tag mismatch at byte 3".into()));
        assert_eq!(err.user_message(), "internal integrity error");
    }

    #[test]
    fn provider_validation_maps_to_400() {
        let err: AppError = ProviderError::Validation {
            message: "amount must be greater than zero".into(),
            field: Some("amount".into()),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
