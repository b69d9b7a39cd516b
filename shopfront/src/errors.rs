use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::cache::CacheError;
use crate::db::errors::DbError;

/// Why a credential check failed. The classification is for callers and
/// logs only; the HTTP boundary collapses all three to one message so the
/// response never reveals whether an account exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
    /// No account with that email
    UnknownUser,
    /// The account exists but has no password set
    MissingPassword,
    /// The password did not match
    WrongPassword,
}

impl std::fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialFailure::UnknownUser => write!(f, "unknown user"),
            CredentialFailure::MissingPassword => write!(f, "account has no password"),
            CredentialFailure::WrongPassword => write!(f, "wrong password"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Credential check failed, with the precise (internal-only) reason
    #[error("credential check failed: {0}")]
    Credentials(CredentialFailure),

    /// User lacks a required permission within the current tenant
    #[error("missing permission {permission:?}")]
    InsufficientPermissions { permission: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A stored payload failed to decode. For session records this is
    /// handled upstream as absence; for credential hashes it is a hard
    /// failure that must never silently authenticate.
    #[error("stored {kind} failed to decode")]
    Corrupt { kind: &'static str },

    /// Session id space exhausted after the bounded number of creation
    /// attempts. Never expected in practice; kept distinct so operators can
    /// alert on it specifically rather than conflating it with store errors.
    #[error("could not allocate a unique session id")]
    SessionIdExhausted,

    /// Key-value store operation error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Relational store operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } | Error::Credentials(_) => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Corrupt { .. } | Error::SessionIdExhausted | Error::Internal { .. } | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            // Deliberately uniform: the caller must not learn which part of
            // the credential check failed.
            Error::Credentials(_) => "Invalid email or password".to_string(),
            Error::InsufficientPermissions { permission } => {
                format!("Missing required permission: {permission}")
            }
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource } => format!("{resource} not found"),
            Error::Cache(_) => "Service temporarily unavailable".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Corrupt { .. } | Error::SessionIdExhausted | Error::Internal { .. } | Error::Other(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::SessionIdExhausted => {
                tracing::error!("Session id allocation exhausted: {:#}", self);
            }
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::Corrupt { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Cache(_) => {
                tracing::warn!("Key-value store error: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Credentials(_) | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
