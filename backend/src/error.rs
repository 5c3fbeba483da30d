//! Error handling for the Shelter Volunteers platform
//!
//! Every failure leaves the server as `{"error": {"code", "message", "field"}}`
//! with a matching HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Upload errors
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    // External service errors
    #[error("Email delivery error: {0}")]
    EmailError(String),

    #[error("GroupMe API error: {0}")]
    GroupMeError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::InvalidToken
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation { .. } | AppError::ValidationError(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::EmailError(_) | AppError::GroupMeError(_) => StatusCode::BAD_GATEWAY,
            AppError::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> ErrorDetail {
        let (code, message, field) = match self {
            AppError::InvalidCredentials => (
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
                None,
            ),
            AppError::TokenExpired => ("TOKEN_EXPIRED", "Token has expired".to_string(), None),
            AppError::InvalidToken => ("INVALID_TOKEN", "Invalid token".to_string(), None),
            AppError::Unauthorized(msg) => ("UNAUTHORIZED", msg.clone(), None),
            AppError::Forbidden(msg) => ("FORBIDDEN", msg.clone(), None),
            AppError::Validation { field, message } => {
                ("VALIDATION_ERROR", message.clone(), Some(field.clone()))
            }
            AppError::ValidationError(msg) => ("VALIDATION_ERROR", msg.clone(), None),
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg.clone(), None),
            AppError::Conflict { resource, message } => {
                ("CONFLICT", message.clone(), Some(resource.clone()))
            }
            AppError::NotFound(resource) => ("NOT_FOUND", format!("{} not found", resource), None),
            AppError::PayloadTooLarge(msg) => ("PAYLOAD_TOO_LARGE", msg.clone(), None),
            AppError::UnsupportedMediaType(msg) => ("UNSUPPORTED_MEDIA_TYPE", msg.clone(), None),
            AppError::EmailError(_) => (
                "EMAIL_ERROR",
                "Email could not be delivered".to_string(),
                None,
            ),
            AppError::GroupMeError(_) => (
                "GROUPME_ERROR",
                "GroupMe message could not be posted".to_string(),
                None,
            ),
            AppError::StorageError(_) => (
                "STORAGE_ERROR",
                "File storage is temporarily unavailable".to_string(),
                None,
            ),
            AppError::Configuration(_) => (
                "CONFIGURATION_ERROR",
                "The server is misconfigured".to_string(),
                None,
            ),
            AppError::DatabaseError(_) => (
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            AppError::Internal(_) | AppError::InternalError(_) => (
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
                None,
            ),
        };
        ErrorDetail {
            code: code.to_string(),
            message,
            field,
        }
    }
}

/// Postgres SQLSTATE codes translated into client errors
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code();
            if let Some(mapped) = constraint_error(code.as_deref(), db_err.constraint()) {
                return mapped;
            }
        }
        AppError::DatabaseError(err)
    }
}

/// Map a Postgres constraint violation to the client-facing error
fn constraint_error(code: Option<&str>, constraint: Option<&str>) -> Option<AppError> {
    let field = constraint_field(constraint.unwrap_or("value"));
    match code? {
        UNIQUE_VIOLATION => Some(AppError::conflict(
            field.clone(),
            format!("A record with this {} already exists", field),
        )),
        FOREIGN_KEY_VIOLATION => Some(AppError::validation(
            field,
            "Referenced record does not exist",
        )),
        _ => None,
    }
}

/// Turn a constraint name such as `users_email_key` into the field it guards
fn constraint_field(constraint: &str) -> String {
    let trimmed = constraint
        .trim_end_matches("_fkey")
        .trim_end_matches("_pkey")
        .trim_end_matches("_key");
    match trimmed.rsplit_once('_') {
        Some((head, "id")) => match head.rsplit_once('_') {
            Some((_, column)) => format!("{}_id", column),
            None => "id".to_string(),
        },
        Some((_, field)) if !field.is_empty() => field.to_string(),
        _ => trimmed.to_string(),
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                AppError::validation(field.to_string(), message)
            }
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

impl From<shared::SessionNoteError> for AppError {
    fn from(err: shared::SessionNoteError) -> Self {
        AppError::validation(err.field, err.message)
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.detail(),
            }),
        )
            .into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
