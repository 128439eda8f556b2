//! Account profile, parent link and payout account handlers.

use axum::{
    Json,
    extract::{Extension, State},
};
use serde::Deserialize;
use tutoring::accounts::{AccessTokenClaims, Account, UserId};

use super::{AppState, error::ApiResult};

#[derive(Debug, Deserialize)]
pub struct LinkChildPayload {
    pub student_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ConnectPayload {
    pub connect_account_id: String,
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
) -> ApiResult<Json<Account>> {
    Ok(Json(state.accounts.get(claims.sub).await?))
}

/// Parent links a student, whose classes it then pays for
pub async fn link_child(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<LinkChildPayload>,
) -> ApiResult<Json<Account>> {
    Ok(Json(
        state
            .accounts
            .link_child(claims.sub, payload.student_id)
            .await?,
    ))
}

/// Tutor records the connect account payouts are transferred to
pub async fn set_connect_account(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<ConnectPayload>,
) -> ApiResult<Json<Account>> {
    Ok(Json(
        state
            .accounts
            .set_connect_account(claims.sub, payload.connect_account_id)
            .await?,
    ))
}
