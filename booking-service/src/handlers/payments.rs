use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{ChargeResponse, CreateChargeRequest, ReconcileResponse, VerifyRazorpayRequest};
use crate::models::Principal;
use crate::services::gateways::CheckoutConfirmation;
use crate::startup::AppState;

/// Open a charge attempt for a booking with the chosen provider.
pub async fn create_charge(
    State(state): State<AppState>,
    principal: Principal,
    Path(booking_id): Path<String>,
    Json(payload): Json<CreateChargeRequest>,
) -> Result<(StatusCode, Json<ChargeResponse>), AppError> {
    tracing::info!(
        booking_id = %booking_id,
        provider = %payload.provider,
        user_id = %principal.user_id,
        "Initiating charge"
    );

    let charge = state
        .payments
        .initiate_charge(&principal, &booking_id, payload.provider)
        .await?;

    Ok((StatusCode::CREATED, Json(charge.into())))
}

/// Client-side confirmation after the Razorpay checkout completes.
pub async fn verify_razorpay(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<VerifyRazorpayRequest>,
) -> Result<Json<ReconcileResponse>, AppError> {
    payload.validate()?;
    tracing::info!(
        razorpay_order_id = %payload.razorpay_order_id,
        razorpay_payment_id = %payload.razorpay_payment_id,
        user_id = %principal.user_id,
        "Verifying Razorpay payment"
    );

    let confirmation = CheckoutConfirmation {
        order_id: payload.razorpay_order_id,
        payment_id: payload.razorpay_payment_id,
        signature: payload.razorpay_signature,
    };
    let outcome = state
        .reconciliation
        .verify_checkout(&principal, &confirmation)
        .await?;

    Ok(Json(outcome.into()))
}
