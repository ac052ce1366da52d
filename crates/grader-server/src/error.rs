//! Error types for the grader server.
//!
//! Responses carry a JSON body `{"error": ..., "code": ...}` where `code` is
//! the stable numeric code of the failure, when one applies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use grader_crypto::ErrorCode;
use serde::Serialize;

use crate::models::ModelError;
use crate::store::StoreError;
use crate::verifier::VerifyError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {message}")]
    BadRequest {
        message: String,
        code: Option<ErrorCode>,
    },

    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        code: Option<ErrorCode>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: message.into(),
            code: None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Database(_) | AppError::Internal(_) => Some(ErrorCode::SystemError),
            AppError::BadRequest { code, .. } | AppError::Forbidden { code, .. } => *code,
            AppError::NotFound(_) | AppError::Conflict(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
}

impl From<VerifyError> for AppError {
    fn from(e: VerifyError) -> Self {
        let code = Some(e.code());
        match e {
            VerifyError::System(msg) => AppError::Internal(msg),
            VerifyError::NoBody | VerifyError::InvalidInput(_) => AppError::BadRequest {
                message: e.to_string(),
                code,
            },
            VerifyError::Crypto(ref crypto)
                if matches!(
                    crypto.code(),
                    ErrorCode::UnsupportedValue | ErrorCode::InvalidInput
                ) =>
            {
                AppError::BadRequest {
                    message: e.to_string(),
                    code,
                }
            }
            VerifyError::KidUnknown(_) | VerifyError::Crypto(_) => AppError::Forbidden {
                message: e.to_string(),
                code,
            },
        }
    }
}

impl From<ModelError> for AppError {
    fn from(e: ModelError) -> Self {
        AppError::BadRequest {
            message: e.to_string(),
            code: Some(e.code()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(column) => {
                AppError::Conflict(format!("identity already exists ({})", column))
            }
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message),
            AppError::Forbidden { message, .. } => (StatusCode::FORBIDDEN, message),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        (status, Json(ErrorBody { error: message, code })).into_response()
    }
}
