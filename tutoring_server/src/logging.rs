//! Structured logging configuration.
//!
//! Log levels come from `RUST_LOG`; the helpers below emit the audit events
//! operators search for when reconciling money movements.

use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// # Example
///
/// ```no_run
/// use tutoring_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a wallet movement initiated through the API
///
/// # Arguments
///
/// * `event_type` - What happened (`funding_started`, `payment_completed`, ...)
/// * `user_id` - Wallet owner
/// * `amount` - Coins moved, when known
/// * `reference` - External reference the movement is keyed on
pub fn log_wallet_event(
    event_type: &str,
    user_id: i64,
    amount: Option<Decimal>,
    reference: Option<&str>,
) {
    tracing::info!(
        event_type = event_type,
        user_id = user_id,
        amount = amount.map(|a| a.to_string()),
        reference = reference,
        "WALLET: {}",
        event_type
    );
}

/// Log a failed call to an external provider
pub fn log_provider_failure(operation: &str, reference: Option<&str>, error: &str) {
    tracing::warn!(
        operation = operation,
        reference = reference,
        error = error,
        "PROVIDER: {} failed",
        operation
    );
}

/// Log security event with structured data
pub fn log_security_event(event_type: &str, user_id: Option<i64>, message: &str) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id,
        "SECURITY: {}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn test_log_wallet_event() {
        // Just ensure it doesn't panic
        log_wallet_event("funding_started", 1, Some(dec!(10)), Some("cs_test"));
        log_wallet_event("payment_completed", 1, None, None);
    }

    #[test]
    fn test_log_provider_failure() {
        log_provider_failure("retrieve_session", Some("cs_test"), "timeout");
        log_provider_failure("available_balance", None, "unauthorized");
    }

    #[test]
    fn test_log_security_event() {
        log_security_event("failed_login", None, "Invalid credentials");
    }
}
