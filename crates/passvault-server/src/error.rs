//! HTTP error types for `PassVault` server.
//!
//! Maps domain errors from `passvault-core` into HTTP responses. Every
//! response carries a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use passvault_core::error::{CryptoError, ExportError, TrackError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Missing or wrong admin token.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The export password did not decrypt the file.
    WrongPassword(String),
    /// The export file is malformed or fails its integrity check.
    Unprocessable(String),
    /// Internal server error.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::WrongPassword(msg) => (StatusCode::BAD_REQUEST, "wrong_password", msg),
            Self::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "corrupt", msg),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<TrackError> for AppError {
    fn from(err: TrackError) -> Self {
        match err {
            TrackError::InvalidAddress { .. } => Self::BadRequest(err.to_string()),
            TrackError::NotFound { .. } => Self::NotFound(err.to_string()),
            TrackError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::PasswordRequired { .. } => Self::BadRequest(err.to_string()),
            ExportError::WrongPassword { .. } => Self::WrongPassword(err.to_string()),
            ExportError::Corrupt { .. } | ExportError::IntegrityMismatch { .. } => {
                Self::Unprocessable(err.to_string())
            }
            ExportError::DirectoryNotWritable { .. }
            | ExportError::Io { .. }
            | ExportError::Serialization { .. }
            | ExportError::Crypto(_)
            | ExportError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn export_errors_map_to_expected_status() {
        let cases = [
            (
                ExportError::WrongPassword {
                    path: PathBuf::from("a.xml"),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ExportError::PasswordRequired {
                    path: PathBuf::from("a.xml"),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ExportError::IntegrityMismatch {
                    path: PathBuf::from("a.xml"),
                    expected: "a".to_owned(),
                    actual: "b".to_owned(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ExportError::Io {
                    path: PathBuf::from("a.xml"),
                    reason: "disk".to_owned(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn track_not_found_is_404() {
        let response = AppError::from(TrackError::NotFound { id: 3 }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
