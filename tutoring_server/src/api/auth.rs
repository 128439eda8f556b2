//! Authentication API handlers.
//!
//! Register a new student:
//! ```bash
//! curl -X POST http://localhost:3000/api/v1/auth/register \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "grace@example.com", "password": "Secure123", "display_name": "Grace",
//!        "role": "student"}'
//! ```
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:3000/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "grace@example.com", "password": "Secure123"}'
//! ```

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tutoring::accounts::{Account, LoginRequest, RegisterRequest, Role, UserId};

use super::{AppState, error::ApiResult};

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
    /// Id of the referring account
    pub referral_code: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user_id: UserId,
    pub role: Role,
    pub display_name: String,
}

impl AuthResponse {
    fn new(account: Account, access_token: String) -> Self {
        Self {
            access_token,
            user_id: account.id,
            role: account.role,
            display_name: account.display_name,
        }
    }
}

/// Register a new account and log it in.
///
/// # Errors
///
/// - `400 Bad Request`: Malformed email, weak password, unknown referrer
/// - `403 Forbidden`: Admin role requested
/// - `409 Conflict`: Email already registered
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<Json<AuthResponse>> {
    let request = RegisterRequest {
        email: payload.email.clone(),
        password: payload.password.clone(),
        display_name: payload.display_name,
        role: payload.role,
        referral_code: payload.referral_code,
    };
    state.accounts.register(request).await?;

    let (account, token) = state
        .accounts
        .login(LoginRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;
    Ok(Json(AuthResponse::new(account, token)))
}

/// Authenticate and return an access token.
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid credentials
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> ApiResult<Json<AuthResponse>> {
    let request = LoginRequest {
        email: payload.email,
        password: payload.password,
    };

    match state.accounts.login(request).await {
        Ok((account, token)) => {
            crate::metrics::login_attempts_total(true);
            Ok(Json(AuthResponse::new(account, token)))
        }
        Err(e) => {
            crate::metrics::login_attempts_total(false);
            crate::logging::log_security_event("failed_login", None, &e.to_string());
            Err(e.into())
        }
    }
}
