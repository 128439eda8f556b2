//! Provider error types.

use thiserror::Error;

/// Errors raised by external providers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an error status
    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Unexpected provider response: {0}")]
    Decode(String),

    /// No client configured for this provider
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            ProviderError::Unavailable(what) => format!("{what} is not configured"),
            _ => "External provider error".to_string(),
        }
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;
