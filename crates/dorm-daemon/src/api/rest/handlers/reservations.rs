//! Reservation handlers, one set shared by every resource kind

use crate::api::rest::extract::Caller;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dorm_storage::{Reservation, ReservationId, ResourceKind};
use serde::{Deserialize, Serialize};

/// List reservations query params
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Create reservation request
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Create reservation response
#[derive(Debug, Serialize)]
pub struct CreateReservationResponse {
    pub id: ReservationId,
}

/// Delete reservation response
#[derive(Debug, Serialize)]
pub struct DeleteReservationResponse {
    pub deleted: bool,
}

/// List reservations of a kind, optionally bounded by `start` and `end`
pub async fn list_reservations(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Reservation>>> {
    let kind = parse_kind(&kind)?;
    let reservations = state
        .reservations
        .list_by_range(kind, query.start, query.end)
        .await?;

    Ok(Json(reservations))
}

/// List the caller's reservations of a kind
pub async fn list_own_reservations(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    caller: Caller,
) -> ApiResult<Json<Vec<Reservation>>> {
    let kind = parse_kind(&kind)?;
    let reservations = state
        .reservations
        .list_by_identity(kind, caller.identity)
        .await?;

    Ok(Json(reservations))
}

/// Book a slot for the caller
pub async fn create_reservation(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    caller: Caller,
    Json(request): Json<CreateReservationRequest>,
) -> ApiResult<(StatusCode, Json<CreateReservationResponse>)> {
    let kind = parse_kind(&kind)?;
    let id = state
        .reservations
        .create(kind, caller.identity, request.start, request.end)
        .await?;

    tracing::debug!(
        reservation_id = %id,
        display_name = %caller.display_name,
        "reservation booked over REST"
    );
    Ok((StatusCode::CREATED, Json(CreateReservationResponse { id })))
}

/// Delete one of the caller's reservations
pub async fn delete_reservation(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    caller: Caller,
) -> ApiResult<Json<DeleteReservationResponse>> {
    let kind = parse_kind(&kind)?;
    state
        .reservations
        .delete(kind, ReservationId(id), caller.identity)
        .await?;

    Ok(Json(DeleteReservationResponse { deleted: true }))
}

fn parse_kind(raw: &str) -> ApiResult<ResourceKind> {
    raw.parse().map_err(ApiError::BadRequest)
}
