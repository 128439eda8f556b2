//! External collaborators: payment rail, meeting links, email delivery.
//!
//! The workflow managers only see the traits in this module. Concrete
//! clients are constructed once at startup and injected:
//!
//! - [`StripeClient`]: checkout sessions, payment intents, transfers, payouts
//! - [`ZoomClient`]: meeting links for accepted classes
//! - [`LogMailer`] / [`WebhookMailer`]: outgoing email
//! - `fake`: scripted in-process doubles (`test-util` feature)

pub mod errors;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod mail;
pub mod stripe;
pub mod zoom;

pub use errors::{ProviderError, ProviderResult};
pub use mail::{LogMailer, WebhookMailer};
pub use stripe::{StripeClient, StripeConfig};
pub use zoom::{ZoomClient, ZoomCredentials};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Checkout session to create for a funding plan
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub name: String,
    pub amount_eur: Decimal,
    pub customer_email: String,
    pub client_reference: String,
}

/// Payment status reported on a checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

/// Checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    pub payment_intent: Option<String>,
}

/// Payment intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Canceled,
    #[serde(other)]
    Unknown,
}

/// Payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
}

/// Transfer from the platform account to a tutor's connect account
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub amount_eur: Decimal,
    pub destination: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: String,
}

/// Payout from a connect account to the tutor's bank
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutInstruction {
    pub amount_eur: Decimal,
    pub connect_account: String,
    pub bank_account: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub id: String,
    /// Set by the provider when the payout was created but rejected
    pub failure_message: Option<String>,
}

/// Payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> ProviderResult<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> ProviderResult<CheckoutSession>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> ProviderResult<PaymentIntent>;

    async fn transfer(&self, request: &TransferRequest) -> ProviderResult<Transfer>;

    async fn payout(&self, instruction: &PayoutInstruction) -> ProviderResult<Payout>;

    /// Available platform balance in EUR
    async fn available_balance(&self) -> ProviderResult<Decimal>;
}

/// Meeting to create for an accepted class
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRequest {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
    /// Fresh per attempt; providers use it to deduplicate retries
    pub request_id: Uuid,
    pub agenda: Option<String>,
    /// IANA zone name, defaults to UTC
    pub timezone: Option<String>,
}

impl MeetingRequest {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Meeting {
    pub join_url: String,
}

/// Meeting link provider
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    async fn create_meeting(&self, request: &MeetingRequest) -> ProviderResult<Meeting>;
}

/// Outgoing email
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> ProviderResult<()>;
}

/// Stand-in for a provider that has no credentials configured
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl PaymentProvider for Unconfigured {
    async fn create_checkout_session(
        &self,
        _request: &CheckoutRequest,
    ) -> ProviderResult<CheckoutSession> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }

    async fn retrieve_session(&self, _session_id: &str) -> ProviderResult<CheckoutSession> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }

    async fn retrieve_payment_intent(&self, _intent_id: &str) -> ProviderResult<PaymentIntent> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }

    async fn transfer(&self, _request: &TransferRequest) -> ProviderResult<Transfer> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }

    async fn payout(&self, _instruction: &PayoutInstruction) -> ProviderResult<Payout> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }

    async fn available_balance(&self) -> ProviderResult<Decimal> {
        Err(ProviderError::Unavailable("payment provider".to_string()))
    }
}

#[async_trait]
impl MeetingProvider for Unconfigured {
    async fn create_meeting(&self, _request: &MeetingRequest) -> ProviderResult<Meeting> {
        Err(ProviderError::Unavailable("meeting provider".to_string()))
    }
}
