//! Tutor payout request handlers.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tutoring::{
    accounts::AccessTokenClaims,
    payout::{PayoutFilter, PayoutId, PayoutRequest},
};

use super::{AppState, error::ApiResult};
use crate::logging::log_wallet_event;

#[derive(Debug, Deserialize)]
pub struct PayoutPayload {
    pub coins: Decimal,
    pub bank_account: String,
}

/// Request a payout; the coins are reserved until settlement
pub async fn request_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<PayoutPayload>,
) -> ApiResult<(StatusCode, Json<PayoutRequest>)> {
    let request = state
        .payouts
        .request_payout(claims.sub, payload.coins, payload.bank_account)
        .await?;
    log_wallet_event("payout_requested", claims.sub, Some(request.coins), None);
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Query(filter): Query<PayoutFilter>,
) -> ApiResult<Json<Vec<PayoutRequest>>> {
    Ok(Json(state.payouts.list_for_tutor(claims.sub, filter).await?))
}

pub async fn get_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(payout_id): Path<PayoutId>,
) -> ApiResult<Json<PayoutRequest>> {
    Ok(Json(state.payouts.get(claims.sub, payout_id).await?))
}
