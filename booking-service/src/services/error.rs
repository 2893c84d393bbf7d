use service_core::error::AppError;
use thiserror::Error;

use crate::models::{BookingStatus, PaymentProvider};
use crate::services::gateways::GatewayError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Missing record: {0}")]
    Missing(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Vehicle not found")]
    VehicleNotFound,

    #[error("Vehicle is not available")]
    VehicleUnavailable,

    #[error("End must be after start")]
    EndNotAfterStart,

    #[error("Minimum booking duration is 1 hour")]
    DurationTooShort,

    #[error("Start date cannot be in the past")]
    StartInPast,

    #[error("Vehicle is already booked for the selected dates")]
    Overlap { conflicting_booking_id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Booking is already paid")]
    AlreadyPaid,

    #[error("Booking cannot be charged in status {0}")]
    NotChargeable(BookingStatus),

    #[error("Booking cannot be cancelled: {0}")]
    NotCancellable(String),

    #[error("Payment provider {0} is not configured")]
    GatewayNotConfigured(PaymentProvider),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Stable label for the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::VehicleNotFound => "vehicle_not_found",
            Self::VehicleUnavailable => "vehicle_unavailable",
            Self::EndNotAfterStart => "end_not_after_start",
            Self::DurationTooShort => "duration_too_short",
            Self::StartInPast => "start_in_past",
            Self::Overlap { .. } => "overlap",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::AlreadyPaid => "already_paid",
            Self::NotChargeable(_) => "not_chargeable",
            Self::NotCancellable(_) => "not_cancellable",
            Self::GatewayNotConfigured(_) => "gateway_not_configured",
            Self::Gateway(_) => "gateway",
            Self::InvalidSignature => "invalid_signature",
            Self::Store(_) => "store",
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::VehicleNotFound => AppError::NotFound(anyhow::anyhow!(message)),
            BookingError::VehicleUnavailable
            | BookingError::EndNotAfterStart
            | BookingError::DurationTooShort
            | BookingError::StartInPast => AppError::BadRequest(anyhow::anyhow!(message)),
            BookingError::Overlap { .. } => AppError::Conflict(anyhow::anyhow!(message)),
            BookingError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!(message)),
            BookingError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            BookingError::AlreadyPaid | BookingError::NotCancellable(_) => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            BookingError::NotChargeable(_) | BookingError::GatewayNotConfigured(_) => {
                AppError::Unprocessable(anyhow::anyhow!(message))
            }
            BookingError::Gateway(e) => AppError::BadGateway(e.to_string()),
            BookingError::InvalidSignature => AppError::Unauthorized(anyhow::anyhow!(message)),
            BookingError::Store(StoreError::Database(e)) => AppError::DatabaseError(e.into()),
            BookingError::Store(e) => AppError::InternalError(e.into()),
        }
    }
}
