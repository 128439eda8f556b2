//! Dispute error types.

use super::models::DisputeId;
use crate::accounts::AccountError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Dispute not found: {0}")]
    NotFound(DisputeId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Dispute {0} is already resolved")]
    AlreadyResolved(DisputeId),

    #[error("Invalid dispute record: {0}")]
    InvalidRecord(String),
}

impl DisputeError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            DisputeError::Database(_) | DisputeError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            DisputeError::Account(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

pub type DisputeResult<T> = Result<T, DisputeError>;
