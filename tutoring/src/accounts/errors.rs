//! Account error types.

use super::models::UserId;
use thiserror::Error;

/// Account errors
#[derive(Debug, Error)]
pub enum AccountError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Email/password pair did not match
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account not found
    #[error("Account not found: {0}")]
    NotFound(UserId),

    /// Email already registered
    #[error("Email already exists")]
    EmailTaken,

    /// Invalid registration field
    #[error("Invalid field: {0}")]
    Validation(String),

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// Caller may not perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// Stored row could not be decoded
    #[error("Invalid account record: {0}")]
    InvalidRecord(String),
}

impl AccountError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            AccountError::Database(_) | AccountError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            AccountError::JwtError(_) => "Authentication failed".to_string(),
            AccountError::NotFound(_) => "Account not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for account operations
pub type AccountResult<T> = Result<T, AccountError>;
