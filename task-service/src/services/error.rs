use service_core::error::AppError;
use thiserror::Error;

use crate::models::Role;

/// Service-level error taxonomy. Every failure in the core resolves to one of
/// these; none is process-fatal.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many attempts")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Invalid verification code")]
    OtpInvalid,

    #[error("Verification code expired")]
    OtpExpired,

    #[error("Verification code already used")]
    OtpAlreadyUsed,

    #[error("Token expired")]
    TokenExpired,

    #[error("Malformed token")]
    TokenMalformed,

    #[error("Token signature invalid")]
    TokenSignatureInvalid,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token reuse detected")]
    TokenReuseDetected,

    #[error("Unknown tenant")]
    UnknownTenant,

    #[error("Requires {required:?} role")]
    Unauthorized { required: Role },

    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("Storage operation timed out")]
    StorageTimeout,

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl ServiceError {
    /// Wrap a storage-layer failure.
    pub fn storage(err: AppError) -> Self {
        ServiceError::Storage(anyhow::anyhow!(err))
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StorageTimeout)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::RateLimited {
                retry_after_seconds,
            } => AppError::TooManyRequests(
                "Too many attempts. Please try again later.".to_string(),
                Some(retry_after_seconds),
            ),
            ServiceError::OtpInvalid => {
                AppError::AuthError(anyhow::anyhow!("Invalid verification code"))
            }
            ServiceError::OtpExpired => {
                AppError::AuthError(anyhow::anyhow!("Verification code expired"))
            }
            ServiceError::OtpAlreadyUsed => {
                AppError::AuthError(anyhow::anyhow!("Verification code already used"))
            }
            ServiceError::TokenExpired => AppError::AuthError(anyhow::anyhow!("Token expired")),
            ServiceError::TokenMalformed => AppError::AuthError(anyhow::anyhow!("Malformed token")),
            ServiceError::TokenSignatureInvalid => {
                AppError::AuthError(anyhow::anyhow!("Token signature invalid"))
            }
            ServiceError::TokenRevoked => AppError::AuthError(anyhow::anyhow!("Token revoked")),
            ServiceError::TokenReuseDetected => {
                AppError::AuthError(anyhow::anyhow!("Token reuse detected"))
            }
            ServiceError::UnknownTenant => AppError::BadRequest(anyhow::anyhow!("Unknown tenant")),
            ServiceError::Unauthorized { required } => {
                AppError::Forbidden(anyhow::anyhow!("Requires {} role", required.as_str()))
            }
            ServiceError::ConnectionRejected(reason) => {
                AppError::AuthError(anyhow::anyhow!("Connection rejected: {}", reason))
            }
            ServiceError::StorageTimeout => AppError::ServiceUnavailable,
            ServiceError::Storage(e) => AppError::DatabaseError(e),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
