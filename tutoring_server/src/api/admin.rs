//! Operator endpoints; mounted behind the admin gate.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tutoring::{
    accounts::{AccessTokenClaims, UserId},
    classroom::Classroom,
    dispute::{Dispute, DisputeFilter, DisputeId},
    payment::{FundingPlan, NewFundingPlan},
    payout::{PayoutFilter, PayoutRequest, SettlementReport},
    wallet::{LedgerCheck, Transaction, TransactionFilter},
};

use super::{AppState, error::ApiResult};

#[derive(Debug, Deserialize)]
pub struct ResolvePayload {
    pub resolution: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionReport {
    pub completed: Vec<Classroom>,
}

/// Transactions across all wallets
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> ApiResult<Json<Vec<Transaction>>> {
    Ok(Json(state.wallets.list(&filter).await?))
}

/// Compare a stored balance with the sum of its completed transactions
pub async fn verify_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<LedgerCheck>> {
    Ok(Json(state.wallets.verify_ledger(user_id).await?))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(plan): Json<NewFundingPlan>,
) -> ApiResult<(StatusCode, Json<FundingPlan>)> {
    let plan = state.payments.create_plan(plan).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    Query(filter): Query<PayoutFilter>,
) -> ApiResult<Json<Vec<PayoutRequest>>> {
    Ok(Json(state.payouts.list(&filter).await?))
}

/// Run a settlement now instead of waiting for the scheduled job
///
/// # Errors
///
/// - `409 Conflict`: A settlement run is already in progress
pub async fn settle_payouts(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
) -> ApiResult<Json<SettlementReport>> {
    tracing::info!(admin_id = claims.sub, "Manual settlement requested");
    Ok(Json(state.payouts.settle(Utc::now()).await?))
}

/// Complete every accepted class whose end time has passed
pub async fn complete_classrooms(
    State(state): State<AppState>,
) -> ApiResult<Json<CompletionReport>> {
    let completed = state.classrooms.complete_due(Utc::now()).await?;
    Ok(Json(CompletionReport { completed }))
}

pub async fn list_disputes(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Query(filter): Query<DisputeFilter>,
) -> ApiResult<Json<Vec<Dispute>>> {
    Ok(Json(state.disputes.list(claims.sub, filter).await?))
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(dispute_id): Path<DisputeId>,
    Json(payload): Json<ResolvePayload>,
) -> ApiResult<Json<Dispute>> {
    Ok(Json(
        state
            .disputes
            .resolve(claims.sub, dispute_id, &payload.resolution)
            .await?,
    ))
}
