//! Provider webhook receivers.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes the
//! provider sent, so nothing is parsed before verification. A bad or missing
//! signature is a 401 with no state change. Verified events are acknowledged
//! with 200 whatever the business outcome, including duplicates.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use service_core::error::AppError;

use crate::dtos::ReconcileResponse;
use crate::models::PaymentProvider;
use crate::services::gateways::{RAZORPAY_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER};
use crate::services::metrics::record_webhook_rejected;
use crate::startup::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileResponse>, AppError> {
    receive(state, PaymentProvider::Stripe, STRIPE_SIGNATURE_HEADER, headers, body).await
}

pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileResponse>, AppError> {
    receive(
        state,
        PaymentProvider::Razorpay,
        RAZORPAY_SIGNATURE_HEADER,
        headers,
        body,
    )
    .await
}

async fn receive(
    state: AppState,
    provider: PaymentProvider,
    signature_header: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileResponse>, AppError> {
    let Some(signature) = headers
        .get(signature_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        tracing::warn!(
            provider = %provider,
            security_event = true,
            "Webhook without signature header"
        );
        record_webhook_rejected(provider);
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing webhook signature"
        )));
    };

    let outcome = state
        .reconciliation
        .handle_webhook(provider, &body, signature)
        .await?;

    tracing::info!(provider = %provider, outcome = outcome.as_str(), "Webhook acknowledged");
    Ok(Json(outcome.into()))
}
