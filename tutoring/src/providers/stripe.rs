//! Stripe REST client.

use super::{
    CheckoutRequest, CheckoutSession, PaymentIntent, PaymentIntentStatus, PaymentProvider, Payout,
    PayoutInstruction, SessionPaymentStatus, Transfer, TransferRequest,
    errors::{ProviderError, ProviderResult},
};
use async_trait::async_trait;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, de::DeserializeOwned};

const CURRENCY: &str = "eur";

/// Stripe client configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    /// Where checkout redirects after payment
    pub success_url: String,
    pub cancel_url: String,
}

impl StripeConfig {
    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            api_base: "https://api.stripe.com".to_string(),
            success_url: "http://localhost:3000/payments/success".to_string(),
            cancel_url: "http://localhost:3000/payments/cancel".to_string(),
        }
    }
}

/// Stripe client
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    config: StripeConfig,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: String,
    url: Option<String>,
    payment_status: SessionPaymentStatus,
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentBody {
    id: String,
    status: PaymentIntentStatus,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayoutBody {
    id: String,
    failure_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    available: Vec<BalanceAmount>,
}

#[derive(Debug, Deserialize)]
struct BalanceAmount {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
        connect_account: Option<&str>,
    ) -> ProviderResult<T> {
        let mut request = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .form(form);
        if let Some(account) = connect_account {
            request = request.header("Stripe-Account", account);
        }
        decode(request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error.message)
            .unwrap_or_else(|| status.to_string());
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

/// EUR amount to integer cents
fn to_cents(amount: Decimal) -> ProviderResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ProviderError::Decode(format!("amount out of range: {amount}")))
}

fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> ProviderResult<CheckoutSession> {
        let form = [
            ("mode", "payment".to_string()),
            ("customer_email", request.customer_email.clone()),
            ("client_reference_id", request.client_reference.clone()),
            ("success_url", self.config.success_url.clone()),
            ("cancel_url", self.config.cancel_url.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", CURRENCY.to_string()),
            (
                "line_items[0][price_data][unit_amount]",
                to_cents(request.amount_eur)?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.name.clone(),
            ),
        ];

        let body: SessionBody = self.post_form("checkout/sessions", &form, None).await?;
        Ok(CheckoutSession {
            id: body.id,
            url: body.url,
            payment_status: body.payment_status,
            payment_intent: body.payment_intent,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> ProviderResult<CheckoutSession> {
        let body: SessionBody = self.get(&format!("checkout/sessions/{session_id}")).await?;
        Ok(CheckoutSession {
            id: body.id,
            url: body.url,
            payment_status: body.payment_status,
            payment_intent: body.payment_intent,
        })
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> ProviderResult<PaymentIntent> {
        let body: PaymentIntentBody = self.get(&format!("payment_intents/{intent_id}")).await?;
        Ok(PaymentIntent {
            id: body.id,
            status: body.status,
        })
    }

    async fn transfer(&self, request: &TransferRequest) -> ProviderResult<Transfer> {
        let form = [
            ("amount", to_cents(request.amount_eur)?.to_string()),
            ("currency", CURRENCY.to_string()),
            ("destination", request.destination.clone()),
            ("description", request.description.clone()),
        ];

        let body: IdBody = self.post_form("transfers", &form, None).await?;
        Ok(Transfer { id: body.id })
    }

    async fn payout(&self, instruction: &PayoutInstruction) -> ProviderResult<Payout> {
        let form = [
            ("amount", to_cents(instruction.amount_eur)?.to_string()),
            ("currency", CURRENCY.to_string()),
            ("destination", instruction.bank_account.clone()),
        ];

        let body: PayoutBody = self
            .post_form("payouts", &form, Some(&instruction.connect_account))
            .await?;
        Ok(Payout {
            id: body.id,
            failure_message: body.failure_message,
        })
    }

    async fn available_balance(&self) -> ProviderResult<Decimal> {
        let body: BalanceBody = self.get("balance").await?;
        Ok(body
            .available
            .iter()
            .filter(|a| a.currency.eq_ignore_ascii_case(CURRENCY))
            .map(|a| from_cents(a.amount))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn test_to_cents_rounds_to_whole_cents() {
        assert_eq!(to_cents(dec!(15.00)).unwrap(), 1500);
        assert_eq!(to_cents(dec!(0.125)).unwrap(), 12);
        assert_eq!(to_cents(dec!(9.999)).unwrap(), 1000);
    }

    #[test]
    fn test_from_cents() {
        assert_eq!(from_cents(1050), dec!(10.50));
        assert_eq!(from_cents(0), Decimal::ZERO);
    }

    #[test]
    fn test_url_joins_base_without_double_slash() {
        let mut config = StripeConfig::new("sk_test".to_string());
        config.api_base = "http://localhost:12111/".to_string();
        let client = StripeClient::new(config);
        assert_eq!(
            client.url("checkout/sessions"),
            "http://localhost:12111/v1/checkout/sessions"
        );
    }

    #[test]
    fn test_session_body_decodes_stripe_shape() {
        let body: SessionBody = serde_json::from_str(
            r#"{"id":"cs_test_1","object":"checkout.session","url":null,
                "payment_status":"paid","payment_intent":"pi_123"}"#,
        )
        .unwrap();
        assert_eq!(body.payment_status, SessionPaymentStatus::Paid);
        assert_eq!(body.payment_intent.as_deref(), Some("pi_123"));
    }

    #[test]
    fn test_unknown_intent_status_is_tolerated() {
        let body: PaymentIntentBody =
            serde_json::from_str(r#"{"id":"pi_1","status":"something_new"}"#).unwrap();
        assert_eq!(body.status, PaymentIntentStatus::Unknown);
    }
}
