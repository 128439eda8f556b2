//! Dispute handlers.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use tutoring::{
    accounts::AccessTokenClaims,
    dispute::{Dispute, DisputeFilter, DisputeId, SubmitDispute},
};

use super::{AppState, error::ApiResult};

pub async fn submit_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<SubmitDispute>,
) -> ApiResult<(StatusCode, Json<Dispute>)> {
    let dispute = state.disputes.submit(claims.sub, payload).await?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

/// Own disputes
pub async fn list_disputes(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Query(mut filter): Query<DisputeFilter>,
) -> ApiResult<Json<Vec<Dispute>>> {
    filter.submitter_id = Some(claims.sub);
    Ok(Json(state.disputes.list(claims.sub, filter).await?))
}

pub async fn get_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(dispute_id): Path<DisputeId>,
) -> ApiResult<Json<Dispute>> {
    Ok(Json(state.disputes.get(claims.sub, dispute_id).await?))
}
