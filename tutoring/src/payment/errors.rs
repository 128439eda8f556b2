//! Payment error types.

use super::models::PlanId;
use crate::{accounts::AccountError, providers::ProviderError, wallet::WalletError};
use thiserror::Error;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Account(#[from] AccountError),

    /// Payment provider call failed; the transaction is left pending
    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Funding plan not found: {0}")]
    PlanNotFound(PlanId),

    /// No transaction carries the reference
    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("Invalid payment reference: {0}")]
    InvalidReference(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid plan record: {0}")]
    InvalidRecord(String),
}

impl PaymentError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            PaymentError::Database(_) | PaymentError::InvalidRecord(_) => {
                "Internal server error".to_string()
            }
            PaymentError::Wallet(e) => e.client_message(),
            PaymentError::Account(e) => e.client_message(),
            PaymentError::Provider(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
