/// Unified error types for Tessera
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the identity service
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request carried neither usable client nor user credentials
    #[error("Client authentication required")]
    ClientAuthenticationRequired,

    #[error("User authentication required")]
    UserAuthenticationRequired,

    #[error("Client or user authentication required")]
    ClientOrUserAuthenticationRequired,

    /// Token endpoint failures (bad grant credentials, expired refresh token)
    #[error("{0}")]
    InvalidGrant(String),

    /// Authorization errors
    #[error("{0}")]
    PermissionDenied(String),

    /// Malformed request payload
    #[error("{0}")]
    ValidationFailed(String),

    /// Entity or reference unknown, expired or consumed
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Username taken")]
    UsernameTaken,

    /// Uniqueness violations other than the username
    #[error("{0}")]
    Conflict(String),

    #[error("Superuser can only be created manually")]
    SuperuserOnlyManually,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Invalid scope")]
    InvalidScope,

    #[error("Invalid grant type")]
    UnsupportedGrantType,

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::ClientAuthenticationRequired
            | IdentityError::UserAuthenticationRequired
            | IdentityError::ClientOrUserAuthenticationRequired
            | IdentityError::InvalidGrant(_) => StatusCode::UNAUTHORIZED,
            IdentityError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::ValidationFailed(_)
            | IdentityError::UsernameTaken
            | IdentityError::Conflict(_)
            | IdentityError::SuperuserOnlyManually
            | IdentityError::RoleNotFound
            | IdentityError::InvalidScope
            | IdentityError::UnsupportedGrantType => StatusCode::BAD_REQUEST,
            IdentityError::Database(_) | IdentityError::Internal(_) | IdentityError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Translate a unique-constraint violation into `conflict`, passing other errors through
    pub fn on_unique_violation(err: sqlx::Error, conflict: IdentityError) -> IdentityError {
        if crate::db::is_unique_violation(&err) {
            conflict
        } else {
            IdentityError::Database(err)
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Convert IdentityError to HTTP response
impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        crate::metrics::record_error(status.as_u16());

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type alias for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
