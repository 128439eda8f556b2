//! Authentication middleware for protected endpoints.
//!
//! [`auth_middleware`] validates the `Authorization: Bearer <token>` header
//! and injects the token's [`AccessTokenClaims`] into request extensions.
//! Handlers read them back with `Extension<AccessTokenClaims>`.
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use tutoring::accounts::AccessTokenClaims;
//!
//! async fn protected_handler(Extension(claims): Extension<AccessTokenClaims>) -> String {
//!     format!("Authenticated as user {}", claims.sub)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tutoring::accounts::{AccessTokenClaims, Role};

use super::{AppState, error::ApiError};

/// Authentication middleware that validates JWT tokens and injects the claims.
///
/// - **Missing header or bad format**: `401 Unauthorized`
/// - **Invalid/expired token**: `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    match state.accounts.verify_access_token(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(_) => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token",
        )),
    }
}

/// Rejects callers whose token does not carry the admin role.
///
/// Must run after [`auth_middleware`].
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let claims = request
        .extensions()
        .get::<AccessTokenClaims>()
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    if claims.role != Role::Admin {
        crate::logging::log_security_event(
            "admin_denied",
            Some(claims.sub),
            "non-admin called an admin endpoint",
        );
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Admin role required"));
    }
    Ok(next.run(request).await)
}
