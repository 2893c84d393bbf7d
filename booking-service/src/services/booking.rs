use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    billable_hours, Booking, BookingStatus, PaymentRecord, Principal, Role, Transaction,
};
use crate::services::clock::Clock;
use crate::services::error::BookingError;
use crate::services::metrics::{record_booking_created, record_booking_rejected};
use crate::services::notifier::{Notification, NotificationDispatcher, NotificationEvent, Recipient};
use crate::services::realtime::RealtimeChannel;
use crate::services::store::{CancelOutcome, InsertOutcome, LedgerStore};
use crate::services::vehicles::VehicleDirectory;

/// What the caller is allowed to see of a booking.
#[derive(Debug, Clone)]
pub enum BookingView {
    /// Until the booking is paid.
    Summary(Booking),
    Full(Booking),
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn LedgerStore>,
    vehicles: Arc<dyn VehicleDirectory>,
    clock: Arc<dyn Clock>,
    notifications: NotificationDispatcher,
    realtime: Arc<dyn RealtimeChannel>,
    currency: String,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        vehicles: Arc<dyn VehicleDirectory>,
        clock: Arc<dyn Clock>,
        notifications: NotificationDispatcher,
        realtime: Arc<dyn RealtimeChannel>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vehicles,
            clock,
            notifications,
            realtime,
            currency: currency.into(),
        }
    }

    /// Validate and create an auto-approved booking.
    ///
    /// Checks run in a fixed order and the first failure wins: vehicle exists
    /// and is available, `end > start`, at least one hour, not in the past,
    /// no overlap. Nothing is written on failure.
    pub async fn create_booking(
        &self,
        principal: &Principal,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let result = self.try_create(principal, vehicle_id, start, end).await;
        if let Err(ref e) = result {
            record_booking_rejected(e.reason());
            tracing::info!(
                vehicle_id = %vehicle_id,
                renter_id = %principal.user_id,
                reason = e.reason(),
                "Booking rejected"
            );
        }
        result
    }

    async fn try_create(
        &self,
        principal: &Principal,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        if principal.role != Role::Renter {
            return Err(BookingError::Forbidden(
                "only renters can create bookings".to_string(),
            ));
        }

        let vehicle = self
            .vehicles
            .get(vehicle_id)
            .await?
            .ok_or(BookingError::VehicleNotFound)?;
        if !vehicle.available {
            return Err(BookingError::VehicleUnavailable);
        }
        if end <= start {
            return Err(BookingError::EndNotAfterStart);
        }
        if end - start < Duration::hours(1) {
            return Err(BookingError::DurationTooShort);
        }
        let now = self.clock.now();
        if start < now {
            return Err(BookingError::StartInPast);
        }

        let hours = billable_hours(start, end);
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            vehicle_id: vehicle.id.clone(),
            renter_id: principal.user_id.clone(),
            vendor_id: vehicle.owner_id.clone(),
            start,
            end,
            price_per_hour: vehicle.price_per_hour,
            total_amount: hours * vehicle.price_per_hour,
            currency: self.currency.clone(),
            status: BookingStatus::Approved,
            payment: PaymentRecord::unpaid(),
            reminder_sent: false,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let booking = match self.store.insert_booking_if_free(booking).await? {
            InsertOutcome::Inserted(booking) => booking,
            InsertOutcome::Conflict(existing) => {
                return Err(BookingError::Overlap {
                    conflicting_booking_id: existing.id,
                });
            }
        };

        record_booking_created();
        tracing::info!(
            booking_id = %booking.id,
            vehicle_id = %booking.vehicle_id,
            renter_id = %booking.renter_id,
            hours = hours,
            total_amount = booking.total_amount,
            "Booking created"
        );

        let payload = json!({
            "booking_id": booking.id,
            "vehicle_id": booking.vehicle_id,
            "renter_id": booking.renter_id,
            "start": booking.start,
            "end": booking.end,
            "total_amount": booking.total_amount,
            "currency": booking.currency,
        });
        self.notifications.dispatch(Notification::new(
            NotificationEvent::BookingCreated,
            Recipient::User(booking.vendor_id.clone()),
            payload.clone(),
        ));
        self.realtime.emit(
            &booking.vendor_id,
            NotificationEvent::BookingCreated.as_str(),
            payload,
        );

        Ok(booking)
    }

    /// Only the renter may read a booking, and only sees the full record once paid.
    pub async fn get_booking_for(
        &self,
        principal: &Principal,
        booking_id: &str,
    ) -> Result<BookingView, BookingError> {
        let booking = self.load(booking_id).await?;
        if booking.renter_id != principal.user_id {
            return Err(BookingError::Forbidden(
                "booking belongs to another user".to_string(),
            ));
        }
        Ok(if booking.is_paid() {
            BookingView::Full(booking)
        } else {
            BookingView::Summary(booking)
        })
    }

    pub async fn list_for_renter(&self, principal: &Principal) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.list_bookings_for_renter(&principal.user_id).await?)
    }

    pub async fn list_transactions(
        &self,
        principal: &Principal,
        booking_id: &str,
    ) -> Result<Vec<Transaction>, BookingError> {
        let booking = self.load(booking_id).await?;
        if booking.renter_id != principal.user_id {
            return Err(BookingError::Forbidden(
                "booking belongs to another user".to_string(),
            ));
        }
        Ok(self.store.list_transactions_for_booking(booking_id).await?)
    }

    /// Cancel an unpaid booking. A paid booking cannot be cancelled here.
    pub async fn cancel_booking(
        &self,
        principal: &Principal,
        booking_id: &str,
        reason: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let booking = self.load(booking_id).await?;
        if booking.renter_id != principal.user_id && !principal.is_admin() {
            return Err(BookingError::Forbidden(
                "booking belongs to another user".to_string(),
            ));
        }

        let now = self.clock.now();
        let reason = reason.unwrap_or("Cancelled by user");
        let cancelled = match self.store.cancel_booking(booking_id, reason, now).await? {
            CancelOutcome::Cancelled(booking) => booking,
            CancelOutcome::AlreadyPaid => {
                return Err(BookingError::NotCancellable(
                    "booking is already paid".to_string(),
                ));
            }
            CancelOutcome::NotCancellable(status) => {
                return Err(BookingError::NotCancellable(format!("booking is {}", status)));
            }
            CancelOutcome::NotFound => return Err(BookingError::NotFound("Booking".to_string())),
        };

        tracing::info!(
            booking_id = %cancelled.id,
            cancelled_by = %principal.user_id,
            "Booking cancelled"
        );

        match self
            .store
            .has_active_booking(&cancelled.vehicle_id, now, None)
            .await
        {
            Ok(false) => {
                if let Err(e) = self.vehicles.set_available(&cancelled.vehicle_id, true).await {
                    tracing::warn!(vehicle_id = %cancelled.vehicle_id, error = %e, "Failed to release vehicle");
                }
            }
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(vehicle_id = %cancelled.vehicle_id, error = %e, "Failed to check vehicle activity")
            }
        }

        let payload = json!({ "booking_id": cancelled.id, "reason": reason });
        self.notifications.dispatch(Notification::new(
            NotificationEvent::BookingCancelled,
            Recipient::User(cancelled.vendor_id.clone()),
            payload.clone(),
        ));
        self.realtime.emit(
            &cancelled.vendor_id,
            NotificationEvent::BookingCancelled.as_str(),
            payload,
        );

        Ok(cancelled)
    }

    async fn load(&self, booking_id: &str) -> Result<Booking, BookingError> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking".to_string()))
    }
}
