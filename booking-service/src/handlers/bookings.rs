use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    BookingResponse, CancelBookingRequest, CompleteExpiredResponse, CreateBookingRequest,
    TransactionResponse,
};
use crate::models::{Principal, Role};
use crate::services::{BookingError, CompletionScope};
use crate::startup::AppState;

pub async fn create_booking(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    payload.validate()?;
    tracing::info!(
        vehicle_id = %payload.vehicle_id,
        renter_id = %principal.user_id,
        start = %payload.start,
        end = %payload.end,
        "Creating booking"
    );

    let booking = state
        .bookings
        .create_booking(&principal, &payload.vehicle_id, payload.start, payload.end)
        .await?;

    Ok((StatusCode::CREATED, Json(BookingResponse::summary(booking))))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state.bookings.list_for_renter(&principal).await?;
    Ok(Json(
        bookings
            .into_iter()
            .map(|b| {
                if b.is_paid() {
                    BookingResponse::full(b)
                } else {
                    BookingResponse::summary(b)
                }
            })
            .collect(),
    ))
}

pub async fn get_booking(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let view = state.bookings.get_booking_for(&principal, &id).await?;
    Ok(Json(view.into()))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    payload: Option<Json<CancelBookingRequest>>,
) -> Result<Json<BookingResponse>, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    let booking = state
        .bookings
        .cancel_booking(&principal, &id, payload.reason.as_deref())
        .await?;
    Ok(Json(BookingResponse::summary(booking)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = state.bookings.list_transactions(&principal, &id).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

/// Manual trigger for the completion sweep. Admins sweep everything, vendors
/// only their own bookings.
pub async fn complete_expired(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<CompleteExpiredResponse>, AppError> {
    let scope = match principal.role {
        Role::Admin => CompletionScope::All,
        Role::Vendor => CompletionScope::Vendor(principal.user_id.clone()),
        Role::Renter => {
            return Err(BookingError::Forbidden(
                "only admins and vendors can complete bookings".to_string(),
            )
            .into());
        }
    };

    let report = state.sweeper.complete_expired(scope).await?;
    tracing::info!(
        triggered_by = %principal.user_id,
        completed = report.completed,
        vehicles_released = report.vehicles_released,
        "Manual completion sweep finished"
    );
    Ok(Json(CompleteExpiredResponse { report }))
}
