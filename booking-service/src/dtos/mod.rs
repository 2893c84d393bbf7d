use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::models::{
    Booking, BookingStatus, PaymentProvider, PaymentStatus, Transaction, TransactionStatus,
    TransactionType,
};
use crate::services::sweeper::CompletionReport;
use crate::services::{BookingView, InitiatedCharge, ReconcileOutcome};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, message = "vehicle_id is required"))]
    pub vehicle_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBookingRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Booking as returned to its renter. Fields after `payment_status` are only
/// present once the booking is paid.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub status: BookingStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_amount: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_hour: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_provider: Option<PaymentProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl BookingResponse {
    pub fn summary(booking: Booking) -> Self {
        Self {
            id: booking.id,
            status: booking.status,
            start: booking.start,
            end: booking.end,
            total_amount: booking.total_amount,
            currency: booking.currency,
            payment_status: booking.payment.status,
            vehicle_id: None,
            vendor_id: None,
            price_per_hour: None,
            payment_provider: None,
            provider_payment_id: None,
            created_at: None,
        }
    }

    pub fn full(booking: Booking) -> Self {
        let vehicle_id = Some(booking.vehicle_id.clone());
        let vendor_id = Some(booking.vendor_id.clone());
        let price_per_hour = Some(booking.price_per_hour);
        let payment_provider = booking.payment.provider;
        let provider_payment_id = booking.payment.provider_payment_id.clone();
        let created_at = Some(booking.created_at);
        Self {
            vehicle_id,
            vendor_id,
            price_per_hour,
            payment_provider,
            provider_payment_id,
            created_at,
            ..Self::summary(booking)
        }
    }
}

impl From<BookingView> for BookingResponse {
    fn from(view: BookingView) -> Self {
        match view {
            BookingView::Summary(b) => Self::summary(b),
            BookingView::Full(b) => Self::full(b),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub provider: PaymentProvider,
    pub provider_id: String,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            booking_id: t.booking_id,
            amount: t.amount,
            currency: t.currency,
            kind: t.kind,
            provider: t.provider,
            provider_id: t.provider_id,
            status: t.status,
            error: t.error,
            metadata: t.metadata,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChargeRequest {
    pub provider: PaymentProvider,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub transaction_id: String,
    pub provider: PaymentProvider,
    /// Payment intent id (Stripe) or order id (Razorpay).
    pub provider_reference: String,
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Stripe publishable key or Razorpay key id.
    pub public_key: String,
}

impl From<InitiatedCharge> for ChargeResponse {
    fn from(charge: InitiatedCharge) -> Self {
        Self {
            transaction_id: charge.transaction.id,
            provider: charge.reference.provider,
            provider_reference: charge.reference.provider_id,
            amount: charge.transaction.amount,
            currency: charge.transaction.currency,
            client_secret: charge.reference.client_secret,
            public_key: charge.reference.public_key,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRazorpayRequest {
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub received: bool,
    pub outcome: &'static str,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        Self {
            received: true,
            outcome: outcome.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompleteExpiredResponse {
    #[serde(flatten)]
    pub report: CompletionReport,
}
