//! Subject and classroom workflow handlers.
//!
//! ```text
//! new ──accept──▶ accepted ──(end time)──▶ completed
//!  │                 │
//!  └─decline─▶ declined   └─cancel─▶ cancelled
//! ```

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tutoring::{
    accounts::{AccessTokenClaims, UserId},
    classroom::{BookingRequest, Classroom, ClassroomFilter, ClassroomId, Subject},
};

use super::{AppState, error::ApiResult};

#[derive(Debug, Deserialize)]
pub struct SubjectPayload {
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DeclinePayload {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Tutor offers a subject at a fixed price per class
pub async fn create_subject(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(payload): Json<SubjectPayload>,
) -> ApiResult<(StatusCode, Json<Subject>)> {
    let subject = state
        .classrooms
        .create_subject(claims.sub, payload.name, payload.price)
        .await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn list_subjects(
    State(state): State<AppState>,
    Path(tutor_id): Path<UserId>,
) -> ApiResult<Json<Vec<Subject>>> {
    Ok(Json(state.classrooms.list_subjects(tutor_id).await?))
}

/// Book a class
///
/// # Errors
///
/// - `402 Payment Required`: Payer balance below the subject price
/// - `400 Bad Request`: Times in the past or out of order
/// - `403 Forbidden`: Caller may not book for the given student
/// - `404 Not Found`: Unknown tutor, student or subject
pub async fn create_classroom(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(request): Json<BookingRequest>,
) -> ApiResult<(StatusCode, Json<Classroom>)> {
    let classroom = state.classrooms.create(claims.sub, request).await?;
    Ok((StatusCode::CREATED, Json(classroom)))
}

/// Classes the caller takes part in (all classes for admins)
pub async fn list_classrooms(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Query(filter): Query<ClassroomFilter>,
) -> ApiResult<Json<Vec<Classroom>>> {
    Ok(Json(state.classrooms.list(claims.sub, filter).await?))
}

pub async fn get_classroom(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(classroom_id): Path<ClassroomId>,
) -> ApiResult<Json<Classroom>> {
    Ok(Json(state.classrooms.get(claims.sub, classroom_id).await?))
}

/// Tutor accepts; a scheduled request is debited now
pub async fn accept(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(classroom_id): Path<ClassroomId>,
) -> ApiResult<Json<Classroom>> {
    Ok(Json(state.classrooms.accept(claims.sub, classroom_id).await?))
}

/// Tutor declines with a reason; a paid booking is refunded
pub async fn decline(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(classroom_id): Path<ClassroomId>,
    Json(payload): Json<DeclinePayload>,
) -> ApiResult<Json<Classroom>> {
    Ok(Json(
        state
            .classrooms
            .decline(
                claims.sub,
                classroom_id,
                payload.reason.as_deref().unwrap_or_default(),
            )
            .await?,
    ))
}

/// Cancel an accepted class and refund the payer
pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Path(classroom_id): Path<ClassroomId>,
) -> ApiResult<Json<Classroom>> {
    Ok(Json(state.classrooms.cancel(claims.sub, classroom_id).await?))
}
