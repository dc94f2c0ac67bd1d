use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

/// Uniform JSON envelope for every HTTP error response. Grounded on the teacher's
/// `db::models::api::ApiResponse` shape (kept, not reinvented) but trimmed to the fields the
/// event-propagation core's error kinds actually populate.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            field: None,
            code: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            field: None,
            code: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::internal_error(message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::internal_error(message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::internal_error(message)
    }

    pub fn conflict(message: impl Into<String>, field: Option<String>, code: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            field,
            code: if code.is_empty() {
                None
            } else {
                Some(code.to_string())
            },
        }
    }
}

/// Error kinds used by the event-propagation core (spec §7) plus the handful of
/// infrastructure errors (`Pool`, `Jwt`, `Config`) that arise at its ports.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        field: Option<String>,
        code: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Handler '{handler}' failed: {message}")]
    HandlerFailure { handler: String, message: String },

    #[error("All handlers for event type '{event_type}' failed: {message}")]
    DispatchAggregateFailure { event_type: String, message: String },

    #[error("Remote publish failed transiently: {0}")]
    PublishRetryable(String),

    #[error("Remote publish exhausted retries: {0}")]
    PublishFatal(String),

    #[error("Broadcast channel full for user {user_id}")]
    BroadcastFull { user_id: String },

    #[error("Operation '{operation}' timed out after {elapsed_ms} ms")]
    Timeout { operation: String, elapsed_ms: u64 },
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, response) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Database error"),
                )
            }
            AppError::Pool(ref e) => {
                tracing::error!("Connection pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Connection error"),
                )
            }
            AppError::Auth { ref message } => (
                StatusCode::UNAUTHORIZED,
                ApiResponse::<()>::unauthorized(message),
            ),
            AppError::Validation { ref message } => (
                StatusCode::BAD_REQUEST,
                ApiResponse::<()>::bad_request(message),
            ),
            AppError::NotFound { ref resource } => (
                StatusCode::NOT_FOUND,
                ApiResponse::<()>::not_found(&format!("{} not found", resource)),
            ),
            AppError::Conflict {
                ref message,
                ref field,
                ref code,
            } => (
                StatusCode::CONFLICT,
                ApiResponse::<()>::conflict(message, field.clone(), code.as_deref().unwrap_or("")),
            ),
            AppError::Config(ref e) => {
                tracing::error!("Configuration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Configuration error"),
                )
            }
            AppError::Jwt(ref e) => {
                tracing::error!("JWT error: {}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    ApiResponse::<()>::unauthorized("Invalid token"),
                )
            }
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error(message),
                )
            }
            AppError::ConcurrencyConflict {
                ref aggregate_id,
                expected,
                actual,
            } => {
                tracing::warn!(
                    "Concurrency conflict on {}: expected {}, found {}",
                    aggregate_id,
                    expected,
                    actual
                );
                (
                    StatusCode::CONFLICT,
                    ApiResponse::<()>::conflict(
                        "The resource was modified by another request",
                        None,
                        "concurrency_conflict",
                    ),
                )
            }
            AppError::HandlerFailure {
                ref handler,
                ref message,
            } => {
                tracing::warn!("Handler '{}' failed: {}", handler, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("A background handler failed"),
                )
            }
            AppError::DispatchAggregateFailure {
                ref event_type,
                ref message,
            } => {
                tracing::error!(
                    "All handlers for event type '{}' failed: {}",
                    event_type,
                    message
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Event processing failed"),
                )
            }
            AppError::PublishRetryable(ref message) => {
                tracing::warn!("Transient publish failure: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Publish temporarily unavailable"),
                )
            }
            AppError::PublishFatal(ref message) => {
                tracing::error!("Publish exhausted retries: {}", message);
                (
                    StatusCode::ACCEPTED,
                    ApiResponse::<()>::internal_error(
                        "Change was saved but live propagation is delayed",
                    ),
                )
            }
            AppError::BroadcastFull { ref user_id } => {
                tracing::warn!("Broadcast channel full for user {}", user_id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::internal_error("Broadcast channel full"),
                )
            }
            AppError::Timeout {
                ref operation,
                elapsed_ms,
            } => {
                tracing::warn!("Operation '{}' timed out after {} ms", operation, elapsed_ms);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ApiResponse::<()>::internal_error("Operation timed out"),
                )
            }
        };

        (status, Json(response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict_with_code(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            message: message.into(),
            field,
            code: Some(code.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
