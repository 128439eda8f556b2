//! Scripted in-process providers for tests and local runs.

use super::{
    CheckoutRequest, CheckoutSession, Email, Mailer, Meeting, MeetingProvider, MeetingRequest,
    PaymentIntent, PaymentIntentStatus, PaymentProvider, Payout, PayoutInstruction,
    SessionPaymentStatus, Transfer, TransferRequest,
    errors::{ProviderError, ProviderResult},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct PaymentState {
    sessions: HashMap<String, CheckoutSession>,
    intents: HashMap<String, PaymentIntentStatus>,
    balance: Decimal,
    next_id: u64,
    transfer_error: Option<String>,
    payout_error: Option<String>,
    payout_failure_message: Option<String>,
    transfers: Vec<TransferRequest>,
    payouts: Vec<PayoutInstruction>,
    lookups: usize,
}

impl PaymentState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_fake_{}", self.next_id)
    }
}

/// Payment provider double: sessions start unpaid, balance starts at zero
#[derive(Default)]
pub struct FakePaymentProvider {
    state: Mutex<PaymentState>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(balance: Decimal) -> Self {
        let provider = Self::default();
        provider.set_balance(balance);
        provider
    }

    pub fn set_balance(&self, balance: Decimal) {
        lock(&self.state).balance = balance;
    }

    pub fn balance(&self) -> Decimal {
        lock(&self.state).balance
    }

    /// Set a session's payment status, creating the session if needed
    pub fn set_session(
        &self,
        session_id: &str,
        payment_status: SessionPaymentStatus,
        payment_intent: Option<&str>,
    ) {
        let mut state = lock(&self.state);
        let session = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| CheckoutSession {
                id: session_id.to_string(),
                url: None,
                payment_status,
                payment_intent: None,
            });
        session.payment_status = payment_status;
        session.payment_intent = payment_intent.map(str::to_string);
    }

    pub fn set_intent(&self, intent_id: &str, status: PaymentIntentStatus) {
        lock(&self.state)
            .intents
            .insert(intent_id.to_string(), status);
    }

    /// Make every transfer fail with `message`
    pub fn fail_transfers(&self, message: Option<&str>) {
        lock(&self.state).transfer_error = message.map(str::to_string);
    }

    /// Make every payout call fail with `message`
    pub fn fail_payouts(&self, message: Option<&str>) {
        lock(&self.state).payout_error = message.map(str::to_string);
    }

    /// Accept payout calls but report them as rejected by the bank
    pub fn reject_payouts(&self, failure_message: Option<&str>) {
        lock(&self.state).payout_failure_message = failure_message.map(str::to_string);
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        lock(&self.state).transfers.clone()
    }

    pub fn payouts(&self) -> Vec<PayoutInstruction> {
        lock(&self.state).payouts.clone()
    }

    /// Number of session and intent lookups served
    pub fn lookups(&self) -> usize {
        lock(&self.state).lookups
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> ProviderResult<CheckoutSession> {
        let mut state = lock(&self.state);
        let id = state.next_id("cs");
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!(
                "https://checkout.example.com/{id}?ref={}",
                request.client_reference
            )),
            payment_status: SessionPaymentStatus::Unpaid,
            payment_intent: None,
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> ProviderResult<CheckoutSession> {
        let mut state = lock(&self.state);
        state.lookups += 1;
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such checkout.session: {session_id}"),
            })
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> ProviderResult<PaymentIntent> {
        let mut state = lock(&self.state);
        state.lookups += 1;
        state
            .intents
            .get(intent_id)
            .map(|status| PaymentIntent {
                id: intent_id.to_string(),
                status: *status,
            })
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such payment_intent: {intent_id}"),
            })
    }

    async fn transfer(&self, request: &TransferRequest) -> ProviderResult<Transfer> {
        let mut state = lock(&self.state);
        if let Some(message) = state.transfer_error.clone() {
            return Err(ProviderError::Api {
                status: 400,
                message,
            });
        }
        if request.amount_eur > state.balance {
            return Err(ProviderError::Api {
                status: 400,
                message: "insufficient available funds".to_string(),
            });
        }
        state.balance -= request.amount_eur;
        state.transfers.push(request.clone());
        Ok(Transfer {
            id: state.next_id("tr"),
        })
    }

    async fn payout(&self, instruction: &PayoutInstruction) -> ProviderResult<Payout> {
        let mut state = lock(&self.state);
        if let Some(message) = state.payout_error.clone() {
            return Err(ProviderError::Api {
                status: 400,
                message,
            });
        }
        state.payouts.push(instruction.clone());
        Ok(Payout {
            id: state.next_id("po"),
            failure_message: state.payout_failure_message.clone(),
        })
    }

    async fn available_balance(&self) -> ProviderResult<Decimal> {
        Ok(lock(&self.state).balance)
    }
}

/// Meeting provider double returning deterministic join urls
#[derive(Default)]
pub struct FakeMeetingProvider {
    fail: Mutex<bool>,
    requests: Mutex<Vec<MeetingRequest>>,
}

impl FakeMeetingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn requests(&self) -> Vec<MeetingRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl MeetingProvider for FakeMeetingProvider {
    async fn create_meeting(&self, request: &MeetingRequest) -> ProviderResult<Meeting> {
        lock(&self.requests).push(request.clone());
        if *lock(&self.fail) {
            return Err(ProviderError::Api {
                status: 503,
                message: "meeting service unavailable".to_string(),
            });
        }
        Ok(Meeting {
            join_url: format!("https://meet.example.com/j/{}", request.request_id),
        })
    }
}

/// Mailer double that records deliveries and can fail the first N sends
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    failures_remaining: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        let mailer = Self::default();
        *lock(&mailer.failures_remaining) = failures;
        mailer
    }

    pub fn sent(&self) -> Vec<Email> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> u32 {
        *lock(&self.attempts)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> ProviderResult<()> {
        *lock(&self.attempts) += 1;
        {
            let mut remaining = lock(&self.failures_remaining);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Unavailable("mail relay".to_string()));
            }
        }
        lock(&self.sent).push(email.clone());
        Ok(())
    }
}
