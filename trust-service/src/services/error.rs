use service_core::error::AppError;
use thiserror::Error;

use super::step_up::TokenError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Wrong, reused, or malformed one-time code. Deliberately uninformative.
    #[error("Invalid code")]
    InvalidCode,

    #[error("Second factor is not enabled")]
    SecondFactorNotEnabled,

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Token(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::InvalidCode => AppError::BadRequest(anyhow::anyhow!("Invalid code")),
            ServiceError::SecondFactorNotEnabled => {
                AppError::Conflict(anyhow::anyhow!("Second factor is not enabled"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::SessionNotFound => {
                AppError::NotFound(anyhow::anyhow!("Session not found"))
            }
            ServiceError::TenantNotFound => AppError::NotFound(anyhow::anyhow!("Tenant not found")),
            ServiceError::Forbidden(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}
