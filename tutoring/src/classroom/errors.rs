//! Classroom error types.

use super::models::{ClassroomId, ClassroomStatus, SubjectId};
use crate::{
    accounts::{AccountError, UserId},
    wallet::WalletError,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Classroom workflow errors
#[derive(Debug, Error)]
pub enum ClassroomError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Classroom not found: {0}")]
    NotFound(ClassroomId),

    #[error("Tutor not found: {0}")]
    TutorNotFound(UserId),

    #[error("Student not found: {0}")]
    StudentNotFound(UserId),

    #[error("Subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ClassroomStatus,
        to: ClassroomStatus,
    },

    #[error("Cancellation window has elapsed")]
    CancellationWindowElapsed,

    #[error("Class has already started")]
    AlreadyStarted,

    #[error("Invalid classroom record: {0}")]
    InvalidRecord(String),
}

impl ClassroomError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            ClassroomError::Database(_) | ClassroomError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            ClassroomError::Wallet(e) => e.client_message(),
            ClassroomError::Account(e) => e.client_message(),
            _ => self.to_string(),
        }
    }

    /// Fold a wallet shortfall raised inside a commit into the booking error
    pub(crate) fn from_ledger(error: ClassroomError) -> ClassroomError {
        match error {
            ClassroomError::Wallet(WalletError::InsufficientBalance {
                available,
                required,
                ..
            }) => ClassroomError::InsufficientFunds {
                available,
                required,
            },
            other => other,
        }
    }
}

/// Result type for classroom operations
pub type ClassroomResult<T> = Result<T, ClassroomError>;
