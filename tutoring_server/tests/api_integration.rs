//! Integration tests driving the HTTP router against the in-memory store.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use rust_decimal::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot` method
use tutoring::WorkflowConfig;
use tutoring::db::MemoryStore;
use tutoring::notify::NotificationQueue;
use tutoring::providers::SessionPaymentStatus;
use tutoring::providers::fake::{FakeMeetingProvider, FakePaymentProvider};
use tutoring::wallet::TransactionType;
use tutoring_server::api::{AppState, Providers, create_router};
use tutoring_server::config::SecurityConfig;

const PASSWORD: &str = "Secure123";

struct TestServer {
    app: axum::Router,
    state: AppState,
    provider: Arc<FakePaymentProvider>,
}

/// Helper to create test server over a fresh store
fn create_test_server() -> TestServer {
    let provider = Arc::new(FakePaymentProvider::new());
    let (queue, _receiver) = NotificationQueue::channel(64);
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Providers {
            payments: provider.clone(),
            meetings: Arc::new(FakeMeetingProvider::new()),
        },
        queue,
        &SecurityConfig {
            jwt_secret: "test_secret_key_for_testing_only_0123456789".to_string(),
            password_pepper: "test_pepper_for_testing_only".to_string(),
        },
        WorkflowConfig::default(),
    );

    TestServer {
        app: create_router(state.clone()),
        state,
        provider,
    }
}

impl TestServer {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register through the API and return (user id, token)
    async fn register(&self, name: &str, role: &str) -> (i64, String) {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "email": format!("{}@example.com", name.to_lowercase()),
                    "password": PASSWORD,
                    "display_name": name,
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["user_id"].as_i64().unwrap(),
            body["access_token"].as_str().unwrap().to_string(),
        )
    }

    async fn admin(&self) -> String {
        self.state
            .accounts
            .create_admin(
                "admin@example.com".to_string(),
                PASSWORD.to_string(),
                "Admin".to_string(),
            )
            .await
            .unwrap();
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": "admin@example.com", "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Tutor with a payout account and one subject at 5 coins
    async fn tutor(&self) -> (i64, String, i64) {
        let (tutor_id, token) = self.register("Ada", "tutor").await;
        let (status, _) = self
            .send(
                "PUT",
                "/api/v1/accounts/connect",
                Some(&token),
                Some(json!({ "connect_account_id": "acct_ada" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, subject) = self
            .send(
                "POST",
                "/api/v1/subjects",
                Some(&token),
                Some(json!({ "name": "Algebra", "price": 5 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{subject}");
        (tutor_id, token, subject["id"].as_i64().unwrap())
    }

    async fn credit(&self, user_id: i64, coins: rust_decimal::Decimal) {
        self.state
            .wallets
            .credit(user_id, coins, TransactionType::FundWallet, "Test funding")
            .await
            .unwrap();
    }
}

fn booking(tutor_id: i64, subject_id: i64, mode: &str) -> Value {
    let start = Utc::now() + Duration::hours(2);
    json!({
        "tutor_id": tutor_id,
        "subject_id": subject_id,
        "start_time": start.to_rfc3339(),
        "end_time": (start + Duration::hours(1)).to_rfc3339(),
        "mode": mode,
    })
}

// ============================================================================
// Health and Auth Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "health-check-1")
        .body(Body::empty())
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "health-check-1");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_register_login_and_me() {
    let server = create_test_server();
    let (user_id, token) = server.register("Grace", "student").await;

    let (status, me) = server.send("GET", "/api/v1/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id);
    assert_eq!(me["role"], "student");

    let (status, body) = server
        .send(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "grace@example.com", "password": "Wrong1234" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_duplicate_and_admin_registration_rejected() {
    let server = create_test_server();
    server.register("Grace", "student").await;

    let payload = |role: &str, email: &str| {
        json!({
            "email": email,
            "password": PASSWORD,
            "display_name": "Grace",
            "role": role,
        })
    };

    let (status, _) = server
        .send(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(payload("student", "grace@example.com")),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = server
        .send(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(payload("admin", "root@example.com")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let server = create_test_server();

    let (status, _) = server.send("GET", "/api/v1/wallet", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .send("GET", "/api/v1/wallet", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_reject_non_admins() {
    let server = create_test_server();
    let (_, token) = server.register("Grace", "student").await;

    let (status, _) = server
        .send("POST", "/api/v1/admin/payouts/settle", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .send("GET", "/api/v1/admin/transactions", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Funding and Booking Tests
// ============================================================================

#[tokio::test]
async fn test_fund_wallet_through_checkout() {
    let server = create_test_server();
    let admin = server.admin().await;
    let (_, token) = server.register("Grace", "student").await;

    let (status, plan) = server
        .send(
            "POST",
            "/api/v1/admin/plans",
            Some(&admin),
            Some(json!({ "name": "Starter", "coins": 10, "price_eur": 10 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{plan}");

    let (status, plans) = server.send("GET", "/api/v1/plans", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.as_array().unwrap().len(), 1);

    let (status, session) = server
        .send(
            "POST",
            "/api/v1/wallet/fund",
            Some(&token),
            Some(json!({ "plan_id": plan["id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert_eq!(session["transaction"]["status"], "pending");

    server
        .provider
        .set_session(&session_id, SessionPaymentStatus::Paid, None);
    let uri = format!("/api/v1/payments/{session_id}/complete");

    let (status, outcome) = server.send("POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "completed");

    let (_, again) = server.send("POST", &uri, Some(&token), None).await;
    assert_eq!(again["outcome"], "already_processed");

    let (_, wallet) = server.send("GET", "/api/v1/wallet", Some(&token), None).await;
    assert_eq!(wallet["balance"].as_f64(), Some(10.0));
}

#[tokio::test]
async fn test_unknown_payment_reference() {
    let server = create_test_server();
    let (_, token) = server.register("Grace", "student").await;

    let (status, _) = server
        .send("POST", "/api/v1/payments/tr_123/complete", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .send("POST", "/api/v1/payments/cs_missing/complete", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_booking_lifecycle() {
    let server = create_test_server();
    let (tutor_id, tutor_token, subject_id) = server.tutor().await;
    let (student_id, student_token) = server.register("Grace", "student").await;
    server.credit(student_id, dec!(12)).await;

    let (status, classroom) = server
        .send(
            "POST",
            "/api/v1/classrooms",
            Some(&student_token),
            Some(booking(tutor_id, subject_id, "request")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{classroom}");
    assert_eq!(classroom["status"], "new");
    let id = classroom["id"].as_i64().unwrap();

    let (status, _) = server
        .send(
            "POST",
            &format!("/api/v1/classrooms/{id}/accept"),
            Some(&student_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, accepted) = server
        .send(
            "POST",
            &format!("/api/v1/classrooms/{id}/accept"),
            Some(&tutor_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert!(accepted["meeting_link"].is_string());

    let (status, _) = server
        .send(
            "POST",
            &format!("/api/v1/classrooms/{id}/accept"),
            Some(&tutor_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, wallet) = server
        .send("GET", "/api/v1/wallet", Some(&student_token), None)
        .await;
    assert_eq!(wallet["balance"].as_f64(), Some(7.0));

    let (status, cancelled) = server
        .send(
            "POST",
            &format!("/api/v1/classrooms/{id}/cancel"),
            Some(&student_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, wallet) = server
        .send("GET", "/api/v1/wallet", Some(&student_token), None)
        .await;
    assert_eq!(wallet["balance"].as_f64(), Some(12.0));

    let (_, listed) = server
        .send("GET", "/api/v1/classrooms", Some(&tutor_token), None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_booking_without_funds_is_payment_required() {
    let server = create_test_server();
    let (tutor_id, _, subject_id) = server.tutor().await;
    let (_, student_token) = server.register("Grace", "student").await;

    let (status, body) = server
        .send(
            "POST",
            "/api/v1/classrooms",
            Some(&student_token),
            Some(booking(tutor_id, subject_id, "instant")),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["error"].is_string());

    let (_, listed) = server
        .send("GET", "/api/v1/classrooms", Some(&student_token), None)
        .await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_decline_requires_reason() {
    let server = create_test_server();
    let (tutor_id, tutor_token, subject_id) = server.tutor().await;
    let (student_id, student_token) = server.register("Grace", "student").await;
    server.credit(student_id, dec!(5)).await;

    let (_, classroom) = server
        .send(
            "POST",
            "/api/v1/classrooms",
            Some(&student_token),
            Some(booking(tutor_id, subject_id, "instant")),
        )
        .await;
    let uri = format!("/api/v1/classrooms/{}/decline", classroom["id"]);

    let (status, _) = server
        .send("POST", &uri, Some(&tutor_token), Some(json!({ "reason": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .send("POST", &uri, Some(&tutor_token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, declined) = server
        .send(
            "POST",
            &uri,
            Some(&tutor_token),
            Some(json!({ "reason": "Fully booked that day" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(declined["status"], "declined");

    let (_, wallet) = server
        .send("GET", "/api/v1/wallet", Some(&student_token), None)
        .await;
    assert_eq!(wallet["balance"].as_f64(), Some(5.0));
}

// ============================================================================
// Payout and Dispute Tests
// ============================================================================

#[tokio::test]
async fn test_payout_request_and_admin_settlement() {
    let server = create_test_server();
    let admin = server.admin().await;
    let (tutor_id, tutor_token, _) = server.tutor().await;
    server.credit(tutor_id, dec!(50)).await;
    server.provider.set_balance(dec!(100));

    let (status, _) = server
        .send(
            "POST",
            "/api/v1/payouts",
            Some(&tutor_token),
            Some(json!({ "coins": 5, "bank_account": "DE89370400440532013000" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, request) = server
        .send(
            "POST",
            "/api/v1/payouts",
            Some(&tutor_token),
            Some(json!({ "coins": 20, "bank_account": "DE89370400440532013000" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{request}");
    assert_eq!(request["status"], "pending");

    let (status, report) = server
        .send("POST", "/api/v1/admin/payouts/settle", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["processed"], json!([request["id"]]));

    let (_, own) = server
        .send("GET", "/api/v1/payouts", Some(&tutor_token), None)
        .await;
    assert_eq!(own[0]["status"], "processed");

    let (_, wallet) = server
        .send("GET", "/api/v1/wallet", Some(&tutor_token), None)
        .await;
    assert_eq!(wallet["balance"].as_f64(), Some(30.0));

    let (status, check) = server
        .send(
            "GET",
            &format!("/api/v1/admin/wallets/{tutor_id}/verify"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["stored_balance"], check["ledger_balance"]);
}

#[tokio::test]
async fn test_dispute_resolution() {
    let server = create_test_server();
    let admin = server.admin().await;
    let (_, token) = server.register("Grace", "student").await;

    let (status, dispute) = server
        .send(
            "POST",
            "/api/v1/disputes",
            Some(&token),
            Some(json!({ "kind": "payment", "content": "Charged twice" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{dispute}");
    let uri = format!("/api/v1/admin/disputes/{}/resolve", dispute["id"]);

    let (status, _) = server
        .send("POST", &uri, Some(&token), Some(json!({ "resolution": "Refunded" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, resolved) = server
        .send("POST", &uri, Some(&admin), Some(json!({ "resolution": "Refunded" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (status, _) = server
        .send("POST", &uri, Some(&admin), Some(json!({ "resolution": "Again" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, all) = server
        .send("GET", "/api/v1/admin/disputes", Some(&admin), None)
        .await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

// ============================================================================
// Background Job Tests
// ============================================================================

#[tokio::test]
async fn test_jobs_run_against_empty_store() {
    let server = create_test_server();

    let report = tutoring_server::jobs::run_settlement(&server.state.payouts).await;
    let report = report.expect("settlement should run");
    assert!(report.processed.is_empty());
    assert!(report.failed.is_empty());

    let completed = tutoring_server::jobs::run_completion_sweep(&server.state.classrooms).await;
    assert_eq!(completed, 0);
}
