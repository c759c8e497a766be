//! Error taxonomy for the escrow core.
//!
//! Three user-visible kinds: not-found (lookup miss), unauthorized (caller
//! is not the required party) and invalid (bad input such as an unknown
//! status code) map to 4xx-equivalents; everything else is internal and
//! maps to a 5xx-equivalent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("malformed persisted record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{service} call failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
}

impl EscrowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EscrowError::NotFound(what.into())
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        EscrowError::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EscrowError::NotFound(_))
    }

    /// User-correctable failures (4xx family): never retried by the core.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EscrowError::NotFound(_) | EscrowError::Unauthorized(_) | EscrowError::Invalid(_)
        )
    }

    /// Internal failures (5xx family): store, malformed records, upstream
    /// services the operation cannot proceed without.
    pub fn is_internal(&self) -> bool {
        !self.is_user_error()
    }
}
