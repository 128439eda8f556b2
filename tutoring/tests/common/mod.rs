//! Shared fixtures: every manager wired over one `MemoryStore` and fake providers.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tutoring::WorkflowConfig;
use tutoring::accounts::{Account, AccountManager, RegisterRequest, Role, UserId};
use tutoring::classroom::{BookingMode, BookingRequest, ClassroomManager, Subject};
use tutoring::db::MemoryStore;
use tutoring::dispute::DisputeManager;
use tutoring::notify::{NotificationQueue, NotificationWorker, RetryPolicy};
use tutoring::payment::PaymentManager;
use tutoring::payout::PayoutManager;
use tutoring::providers::fake::{FakeMeetingProvider, FakePaymentProvider, RecordingMailer};
use tutoring::wallet::{TransactionType, WalletManager};

pub const PASSWORD: &str = "Secure123";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub accounts: AccountManager,
    pub wallets: WalletManager,
    pub payments: PaymentManager,
    pub classrooms: ClassroomManager,
    pub payouts: PayoutManager,
    pub disputes: DisputeManager,
    pub provider: Arc<FakePaymentProvider>,
    pub meetings: Arc<FakeMeetingProvider>,
    pub mailer: Arc<RecordingMailer>,
    pub worker: NotificationWorker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> Self {
        Self::build(config, RecordingMailer::new())
    }

    pub fn with_mailer(mailer: RecordingMailer) -> Self {
        Self::build(WorkflowConfig::default(), mailer)
    }

    fn build(config: WorkflowConfig, mailer: RecordingMailer) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakePaymentProvider::new());
        let meetings = Arc::new(FakeMeetingProvider::new());
        let mailer = Arc::new(mailer);
        let (queue, receiver) = NotificationQueue::channel(256);
        let worker = NotificationWorker::new(
            receiver,
            mailer.clone(),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(2),
            },
        );

        Self {
            accounts: AccountManager::new(
                store.clone(),
                "test_pepper_0123456789".to_string(),
                "test_jwt_secret_0123456789abcdef0123".to_string(),
            ),
            wallets: WalletManager::new(store.clone()),
            payments: PaymentManager::new(
                store.clone(),
                store.clone(),
                store.clone(),
                provider.clone(),
                config.clone(),
            ),
            classrooms: ClassroomManager::new(
                store.clone(),
                store.clone(),
                store.clone(),
                meetings.clone(),
                queue,
                config.clone(),
            ),
            payouts: PayoutManager::new(store.clone(), store.clone(), provider.clone(), config),
            disputes: DisputeManager::new(store.clone(), store.clone()),
            store,
            provider,
            meetings,
            mailer,
            worker,
        }
    }

    pub async fn register(&self, name: &str, role: Role) -> Account {
        self.register_referred(name, role, None).await
    }

    pub async fn register_referred(
        &self,
        name: &str,
        role: Role,
        referral_code: Option<UserId>,
    ) -> Account {
        self.accounts
            .register(RegisterRequest {
                email: format!("{}@example.com", name.to_lowercase()),
                password: PASSWORD.to_string(),
                display_name: name.to_string(),
                role,
                referral_code,
            })
            .await
            .expect("register")
    }

    pub async fn admin(&self) -> Account {
        self.accounts
            .create_admin(
                "admin@example.com".to_string(),
                PASSWORD.to_string(),
                "Admin".to_string(),
            )
            .await
            .expect("create admin")
    }

    /// Tutor with a connect account and one subject at `price`
    pub async fn tutor_with_subject(&self, name: &str, price: Decimal) -> (Account, Subject) {
        let tutor = self.register(name, Role::Tutor).await;
        let tutor = self
            .accounts
            .set_connect_account(tutor.id, format!("acct_{}", tutor.id))
            .await
            .expect("connect account");
        let subject = self
            .classrooms
            .create_subject(tutor.id, "Algebra".to_string(), price)
            .await
            .expect("create subject");
        (tutor, subject)
    }

    /// Credit coins straight to a wallet
    pub async fn fund(&self, user_id: UserId, amount: Decimal) {
        self.wallets
            .credit(user_id, amount, TransactionType::FundWallet, "Test funding")
            .await
            .expect("fund wallet");
    }

    pub async fn balance(&self, user_id: UserId) -> Decimal {
        self.wallets
            .get_wallet(user_id)
            .await
            .expect("wallet")
            .balance
    }
}

/// One-hour class starting `hours` from now
pub fn booking(
    tutor: &Account,
    subject: &Subject,
    hours: i64,
    mode: BookingMode,
) -> BookingRequest {
    let start = Utc::now() + Duration::hours(hours);
    BookingRequest {
        tutor_id: tutor.id,
        subject_id: subject.id,
        student_id: None,
        name: None,
        description: Some("Quadratic equations".to_string()),
        start_time: start,
        end_time: start + Duration::hours(1),
        mode,
    }
}
