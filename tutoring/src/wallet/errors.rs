//! Wallet error types.

use crate::accounts::UserId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Insufficient balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        user_id: UserId,
        available: Decimal,
        required: Decimal,
    },

    /// Wallet not found
    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),

    /// No transaction carries the given reference
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Reference already attached to another transaction
    #[error("Duplicate transaction reference: {0}")]
    DuplicateReference(String),

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Stored row could not be decoded
    #[error("Invalid ledger record: {0}")]
    InvalidRecord(String),
}

impl WalletError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Database(_) | WalletError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            WalletError::WalletNotFound(_) => "Wallet not found".to_string(),
            WalletError::InsufficientBalance { .. } => "Insufficient wallet balance".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
