use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Insufficient stock: product 1 has 15 available, 16 requested",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Disabled: {0}")]
    Disabled(String),

    #[error("Variant required: {0}")]
    VariantRequired(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transient storage failure: {0}")]
    TransientStorage(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a storage error, keeping lock timeouts and deadlocks distinguishable
    /// so the transaction runner can retry them.
    pub fn db_error(error: DbErr) -> Self {
        if is_transient_db_error(&error) {
            ServiceError::TransientStorage(error.to_string())
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    pub fn insufficient_stock(target: impl std::fmt::Display, available: i32, requested: i32) -> Self {
        ServiceError::InsufficientStock(format!(
            "{} has {} available, {} requested",
            target, available, requested
        ))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStorage(_) => true,
            Self::DatabaseError(err) => is_transient_db_error(err),
            _ => false,
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Disabled(_)
            | Self::VariantRequired(_)
            | Self::InvalidState(_)
            | Self::InsufficientStock(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_) | Self::TransientStorage(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::TransientStorage(_) => {
                "Storage temporarily unavailable, please retry".to_string()
            }
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Lock waits, deadlocks, serialization aborts and pool exhaustion are safe to
/// retry from scratch because nothing was committed.
pub fn is_transient_db_error(error: &DbErr) -> bool {
    if matches!(error, DbErr::ConnectionAcquire(_)) {
        return true;
    }
    let message = error.to_string().to_ascii_lowercase();
    const MARKERS: [&str; 7] = [
        "deadlock",
        "lock timeout",
        "lock_timeout",
        "could not serialize",
        "database is locked",
        "database table is locked",
        "busy",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
