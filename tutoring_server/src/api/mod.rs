//! HTTP API for the tutoring marketplace.
//!
//! # Modules
//!
//! - [`auth`]: registration and login
//! - [`wallet`]: balances, history, funding and payment completion
//! - [`classrooms`]: subjects and the booking workflow
//! - [`accounts`]: profile, parent links, payout accounts
//! - [`payouts`]: tutor payout requests
//! - [`disputes`]: support disputes
//! - [`admin`]: operator endpoints (admin role required)
//! - [`middleware`]: JWT authentication and admin gate
//! - [`request_id`]: request correlation
//! - [`error`]: domain error to HTTP status mapping
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tutoring::{WorkflowConfig, db::MemoryStore, notify::NotificationQueue};
//! use tutoring::providers::Unconfigured;
//! use tutoring_server::api::{AppState, Providers, create_router};
//! use tutoring_server::config::SecurityConfig;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (queue, _receiver) = NotificationQueue::channel(1024);
//! let state = AppState::new(
//!     Arc::new(MemoryStore::new()),
//!     Providers {
//!         payments: Arc::new(Unconfigured),
//!         meetings: Arc::new(Unconfigured),
//!     },
//!     queue,
//!     &SecurityConfig {
//!         jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
//!         password_pepper: "0123456789abcdef".to_string(),
//!     },
//!     WorkflowConfig::default(),
//! );
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod admin;
pub mod auth;
pub mod classrooms;
pub mod disputes;
pub mod error;
pub mod middleware;
pub mod payouts;
pub mod request_id;
pub mod wallet;

use crate::config::SecurityConfig;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tutoring::{
    WorkflowConfig,
    accounts::AccountManager,
    classroom::ClassroomManager,
    db::{
        AccountRepository, ClassroomRepository, Database, DisputeRepository, LedgerRepository,
        PayoutRepository, PlanRepository,
    },
    dispute::DisputeManager,
    notify::NotificationQueue,
    payment::PaymentManager,
    payout::PayoutManager,
    providers::{MeetingProvider, PaymentProvider},
    wallet::WalletManager,
};

/// Application state shared across all HTTP handlers and background jobs.
///
/// Cloned for each request; every manager sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountManager>,
    pub wallets: Arc<WalletManager>,
    pub payments: Arc<PaymentManager>,
    pub classrooms: Arc<ClassroomManager>,
    pub payouts: Arc<PayoutManager>,
    pub disputes: Arc<DisputeManager>,
    /// PostgreSQL pool checked by `/health`; `None` when serving from memory
    pub database: Option<Database>,
}

/// External providers injected into the managers
#[derive(Clone)]
pub struct Providers {
    pub payments: Arc<dyn PaymentProvider>,
    pub meetings: Arc<dyn MeetingProvider>,
}

impl AppState {
    /// Wire every manager over one store
    ///
    /// # Arguments
    ///
    /// * `store` - Implements all repository traits (`PgStore` or `MemoryStore`)
    /// * `providers` - Payment and meeting providers
    /// * `notifications` - Queue drained by the notification worker
    /// * `security` - JWT secret and password pepper
    /// * `workflow` - Business parameters
    pub fn new<S>(
        store: Arc<S>,
        providers: Providers,
        notifications: NotificationQueue,
        security: &SecurityConfig,
        workflow: WorkflowConfig,
    ) -> Self
    where
        S: AccountRepository
            + LedgerRepository
            + PlanRepository
            + ClassroomRepository
            + PayoutRepository
            + DisputeRepository
            + 'static,
    {
        Self {
            accounts: Arc::new(AccountManager::new(
                store.clone(),
                security.password_pepper.clone(),
                security.jwt_secret.clone(),
            )),
            wallets: Arc::new(WalletManager::new(store.clone())),
            payments: Arc::new(PaymentManager::new(
                store.clone(),
                store.clone(),
                store.clone(),
                providers.payments.clone(),
                workflow.clone(),
            )),
            classrooms: Arc::new(ClassroomManager::new(
                store.clone(),
                store.clone(),
                store.clone(),
                providers.meetings,
                notifications,
                workflow.clone(),
            )),
            payouts: Arc::new(PayoutManager::new(
                store.clone(),
                store.clone(),
                providers.payments,
                workflow,
            )),
            disputes: Arc::new(DisputeManager::new(store.clone(), store)),
            database: None,
        }
    }

    /// Attach the database pool checked by `/health`
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Endpoint Summary
///
/// ```text
/// GET  /health                                  - Health check (public)
/// POST /api/v1/auth/register                    - Register (public)
/// POST /api/v1/auth/login                       - Login (public)
/// GET  /api/v1/plans                            - Funding plans (public)
/// GET  /api/v1/me                               - Own account
/// GET  /api/v1/wallet                           - Own wallet
/// GET  /api/v1/wallet/transactions              - Own transaction history
/// POST /api/v1/wallet/fund                      - Start checkout for a plan
/// POST /api/v1/payments/{reference}/complete    - Reconcile a payment
/// POST /api/v1/subjects                         - Tutor creates a subject
/// GET  /api/v1/tutors/{id}/subjects             - Subjects of a tutor
/// POST /api/v1/classrooms                       - Book a class
/// GET  /api/v1/classrooms                       - Own classes
/// GET  /api/v1/classrooms/{id}                  - One class
/// POST /api/v1/classrooms/{id}/accept           - Tutor accepts
/// POST /api/v1/classrooms/{id}/decline          - Tutor declines
/// POST /api/v1/classrooms/{id}/cancel           - Cancel an accepted class
/// POST /api/v1/accounts/children                - Parent links a student
/// PUT  /api/v1/accounts/connect                 - Tutor sets payout account
/// POST /api/v1/payouts                          - Tutor requests a payout
/// GET  /api/v1/payouts                          - Own payout requests
/// POST /api/v1/disputes                         - Open a dispute
/// GET  /api/v1/disputes                         - Own disputes
/// GET  /api/v1/admin/transactions               - All transactions
/// GET  /api/v1/admin/wallets/{user_id}/verify   - Ledger consistency check
/// POST /api/v1/admin/plans                      - Create a funding plan
/// GET  /api/v1/admin/payouts                    - All payout requests
/// POST /api/v1/admin/payouts/settle             - Run settlement now
/// POST /api/v1/admin/classrooms/complete        - Run completion sweep now
/// GET  /api/v1/admin/disputes                   - All disputes
/// POST /api/v1/admin/disputes/{id}/resolve      - Resolve a dispute
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_v1_router(state.clone()))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/plans", get(wallet::list_plans));

    let protected_routes = Router::new()
        .route("/me", get(accounts::me))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/fund", post(wallet::start_funding))
        .route("/payments/{reference}/complete", post(wallet::complete_payment))
        .route("/subjects", post(classrooms::create_subject))
        .route("/tutors/{tutor_id}/subjects", get(classrooms::list_subjects))
        .route(
            "/classrooms",
            post(classrooms::create_classroom).get(classrooms::list_classrooms),
        )
        .route("/classrooms/{classroom_id}", get(classrooms::get_classroom))
        .route("/classrooms/{classroom_id}/accept", post(classrooms::accept))
        .route("/classrooms/{classroom_id}/decline", post(classrooms::decline))
        .route("/classrooms/{classroom_id}/cancel", post(classrooms::cancel))
        .route("/accounts/children", post(accounts::link_child))
        .route("/accounts/connect", put(accounts::set_connect_account))
        .route(
            "/payouts",
            post(payouts::request_payout).get(payouts::list_payouts),
        )
        .route("/payouts/{payout_id}", get(payouts::get_payout))
        .route(
            "/disputes",
            post(disputes::submit_dispute).get(disputes::list_disputes),
        )
        .route("/disputes/{dispute_id}", get(disputes::get_dispute))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Admin gate runs after authentication
    let admin_routes = Router::new()
        .route("/admin/transactions", get(admin::list_transactions))
        .route("/admin/wallets/{user_id}/verify", get(admin::verify_wallet))
        .route("/admin/plans", post(admin::create_plan))
        .route("/admin/payouts", get(admin::list_payouts))
        .route("/admin/payouts/settle", post(admin::settle_payouts))
        .route("/admin/classrooms/complete", post(admin::complete_classrooms))
        .route("/admin/disputes", get(admin::list_disputes))
        .route("/admin/disputes/{dispute_id}/resolve", post(admin::resolve_dispute))
        .layer(axum::middleware::from_fn(middleware::admin_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
