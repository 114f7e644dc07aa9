use crate::services::{identity_service::IdentityError, tree_service::TreeError};
use axum::{
    Json,
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const AUTHENTICATION_FAILED: &str = "AUTHENTICATION_FAILED";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const PERSISTENCE_ERROR: &str = "PERSISTENCE_ERROR";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
pub const SERVER_ERROR: &str = "SERVER_ERROR";

/// The single error type handlers return. Renders as
/// `{"success": false, "error": CODE, "message": ..., "status": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 with `VALIDATION_ERROR`
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, VALIDATION_ERROR, msg)
    }

    /// Shortcut for 401 with `AUTHENTICATION_FAILED`
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, AUTHENTICATION_FAILED, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, NOT_FOUND, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR, msg)
    }

    /// Re-status persistence and storage failures. Call sites differ on
    /// whether a collaborator failure is the client's 400 or a 500.
    pub fn with_collaborator_status(mut self, status: StatusCode) -> Self {
        if matches!(self.code, PERSISTENCE_ERROR | STORAGE_ERROR) {
            self.status = status;
        }
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "{}", self.message);
        } else {
            tracing::warn!(code = self.code, status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "success": false,
            "error": self.code,
            "message": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<TreeError> for AppError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Validation(msg) => AppError::validation(msg),
            TreeError::NotFound(msg) => AppError::new(StatusCode::BAD_REQUEST, NOT_FOUND, msg),
            TreeError::Persistence(err) => {
                AppError::new(StatusCode::BAD_REQUEST, PERSISTENCE_ERROR, err.to_string())
            }
            TreeError::Storage(err) => {
                AppError::new(StatusCode::BAD_REQUEST, STORAGE_ERROR, err.to_string())
            }
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Validation(_) => AppError::validation(err.to_string()),
            IdentityError::EmailTaken => AppError::validation(err.to_string()),
            IdentityError::InvalidCredentials | IdentityError::InvalidToken => {
                AppError::unauthorized(err.to_string())
            }
            IdentityError::Hashing(_) | IdentityError::Token(_) | IdentityError::Sqlx(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::validation(err.body_text())
    }
}
