//! Coordinator error taxonomy.

use super::types::SessionId;
use crate::tracks::IntegrityError;

/// Errors returned by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Malformed request; never retried automatically.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session is full: {0}")]
    SessionFull(SessionId),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Track integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    /// Per-session lock not acquired in time; safe to retry.
    #[error("Timed out waiting for session {0}")]
    LockTimeout(SessionId),
}

impl CoordinatorError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoordinatorError::Validation(message.into())
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "validation_error",
            CoordinatorError::SessionNotFound(_) => "session_not_found",
            CoordinatorError::SessionFull(_) => "session_full",
            CoordinatorError::InvalidPassword => "invalid_password",
            CoordinatorError::Unauthorized => "unauthorized",
            CoordinatorError::Integrity(_) => "integrity_error",
            CoordinatorError::LockTimeout(_) => "internal_error",
        }
    }

    /// Expected business-rule outcome rather than a failure.
    pub fn is_business_outcome(&self) -> bool {
        matches!(
            self,
            CoordinatorError::SessionNotFound(_)
                | CoordinatorError::SessionFull(_)
                | CoordinatorError::InvalidPassword
                | CoordinatorError::Unauthorized
        )
    }

    /// Whether repeating the whole request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::LockTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
