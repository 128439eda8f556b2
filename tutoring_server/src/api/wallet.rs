//! Wallet, funding plan and payment completion handlers.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use serde::Deserialize;
use tutoring::{
    accounts::AccessTokenClaims,
    payment::{FundingPlan, FundingSession, PlanId, Reconciliation},
    wallet::{Transaction, TransactionFilter, Wallet},
};

use super::{AppState, error::ApiResult};
use crate::logging::log_wallet_event;

#[derive(Debug, Deserialize)]
pub struct FundPayload {
    pub plan_id: PlanId,
}

/// Funding plans on sale
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<FundingPlan>>> {
    Ok(Json(state.payments.list_plans().await?))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
) -> ApiResult<Json<Wallet>> {
    Ok(Json(state.wallets.get_wallet(claims.sub).await?))
}

/// Own transaction history, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Query(filter): Query<TransactionFilter>,
) -> ApiResult<Json<Vec<Transaction>>> {
    Ok(Json(state.wallets.history(claims.sub, filter).await?))
}

/// Open a checkout session for a plan
///
/// The returned pending transaction is settled by
/// `POST /payments/{reference}/complete` once the user has paid.
pub async fn start_funding(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<FundPayload>,
) -> ApiResult<Json<FundingSession>> {
    let session = state
        .payments
        .start_funding(claims.sub, payload.plan_id)
        .await?;
    log_wallet_event(
        "funding_started",
        claims.sub,
        Some(session.transaction.amount),
        Some(&session.session_id),
    );
    Ok(Json(session))
}

/// Reconcile a checkout session or payment intent
///
/// Safe to call repeatedly: a settled reference reports `already_processed`.
pub async fn complete_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Reconciliation>> {
    let outcome = state.payments.complete_payment(&reference).await?;
    let transaction = outcome.transaction();
    log_wallet_event(
        &format!("payment_{}", outcome.label()),
        transaction.owner_id,
        Some(transaction.amount),
        Some(&reference),
    );
    tracing::debug!(caller = claims.sub, reference = %reference, "Payment completion requested");
    Ok(Json(outcome))
}
