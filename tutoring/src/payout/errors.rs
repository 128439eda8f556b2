//! Payout error types.

use super::models::PayoutId;
use crate::{accounts::AccountError, providers::ProviderError, wallet::WalletError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Payout errors
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Payout request not found: {0}")]
    NotFound(PayoutId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Minimum payout is {minimum} coins")]
    BelowMinimum { minimum: Decimal },

    /// Tutor has no connect account to transfer to
    #[error("No payout account configured")]
    NoConnectAccount,

    /// Request is not in `processing`, so this run does not own it
    #[error("Payout request {0} is not claimed")]
    NotClaimed(PayoutId),

    /// Bank payout was accepted by the provider but reported as failed
    #[error("Payout rejected: {0}")]
    Rejected(String),

    /// Another settlement run holds the lock
    #[error("Settlement already in progress")]
    SettlementInProgress,

    #[error("Invalid payout record: {0}")]
    InvalidRecord(String),
}

impl PayoutError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            PayoutError::Database(_) | PayoutError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            PayoutError::Wallet(e) => e.client_message(),
            PayoutError::Account(e) => e.client_message(),
            PayoutError::Provider(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for payout operations
pub type PayoutResult<T> = Result<T, PayoutError>;
