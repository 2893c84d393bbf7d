//! Periodic passes over bookings and charge attempts.
//!
//! Every pass is idempotent and safe to run concurrently with itself: each
//! per-item write is conditional, and an item another run already moved is
//! skipped.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::services::clock::Clock;
use crate::services::error::BookingError;
use crate::services::notifier::{Notification, NotificationDispatcher, NotificationEvent, Recipient};
use crate::services::store::{BookingSweepQuery, LedgerStore};
use crate::services::vehicles::VehicleDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionScope {
    All,
    Vendor(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    pub examined: u64,
    pub completed: u64,
    pub vehicles_released: u64,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn LedgerStore>,
    vehicles: Arc<dyn VehicleDirectory>,
    clock: Arc<dyn Clock>,
    notifications: NotificationDispatcher,
    stale_after: Duration,
    reminder_lead: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        vehicles: Arc<dyn VehicleDirectory>,
        clock: Arc<dyn Clock>,
        notifications: NotificationDispatcher,
        stale_after: Duration,
        reminder_lead: Duration,
    ) -> Self {
        Self {
            store,
            vehicles,
            clock,
            notifications,
            stale_after,
            reminder_lead,
        }
    }

    /// Move paid bookings whose window has ended to `completed`, freeing
    /// each vehicle that has no other booking active right now.
    ///
    /// The vehicle is freed before the booking is completed, so a failed
    /// release leaves the booking due and the next run retries it.
    pub async fn complete_expired(
        &self,
        scope: CompletionScope,
    ) -> Result<CompletionReport, BookingError> {
        let now = self.clock.now();
        let vendor_id = match scope {
            CompletionScope::All => None,
            CompletionScope::Vendor(id) => Some(id),
        };
        let due = self
            .store
            .find_bookings(&BookingSweepQuery::DueForCompletion { now, vendor_id })
            .await?;

        let mut report = CompletionReport {
            examined: due.len() as u64,
            ..Default::default()
        };
        for booking in due {
            let released = match self
                .release_vehicle_if_idle(&booking.vehicle_id, Some(&booking.id), now)
                .await
            {
                Ok(released) => released,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        booking_id = %booking.id,
                        vehicle_id = %booking.vehicle_id,
                        "Failed to release vehicle; completion deferred to the next run"
                    );
                    continue;
                }
            };
            if !self.store.complete_booking(&booking.id, now).await? {
                continue;
            }
            report.completed += 1;
            if released {
                report.vehicles_released += 1;
            }
            tracing::info!(booking_id = %booking.id, vehicle_id = %booking.vehicle_id, "Booking completed");
        }
        Ok(report)
    }

    /// Mark the vehicle available when no holding booking other than
    /// `excluding` covers `now`.
    async fn release_vehicle_if_idle(
        &self,
        vehicle_id: &str,
        excluding: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        if self
            .store
            .has_active_booking(vehicle_id, now, excluding)
            .await?
        {
            return Ok(false);
        }
        self.vehicles.set_available(vehicle_id, true).await?;
        Ok(true)
    }

    /// Fail pending attempts older than the stale window.
    pub async fn fail_stale_transactions(&self) -> Result<u64, BookingError> {
        let now = self.clock.now();
        let cutoff = now - self.stale_after;
        let reason = format!(
            "Payment attempt expired: no confirmation received within {} minutes",
            self.stale_after.num_minutes()
        );
        let moved = self
            .store
            .fail_stale_transactions(cutoff, &reason, now)
            .await?;
        if moved > 0 {
            tracing::info!(count = moved, cutoff = %cutoff, "Stale charge attempts failed");
        }
        Ok(moved)
    }

    /// Mark vehicles with a paid booking in progress as unavailable.
    pub async fn activate_in_progress(&self) -> Result<u64, BookingError> {
        let now = self.clock.now();
        let active = self
            .store
            .find_bookings(&BookingSweepQuery::InProgress { now })
            .await?;
        let mut touched = 0;
        for booking in active {
            self.vehicles
                .set_available(&booking.vehicle_id, false)
                .await?;
            touched += 1;
        }
        Ok(touched)
    }

    /// Cancel approved bookings that reached their start time unpaid.
    pub async fn release_unpaid_holds(&self) -> Result<u64, BookingError> {
        let now = self.clock.now();
        let unpaid = self
            .store
            .find_bookings(&BookingSweepQuery::UnpaidPastStart { now })
            .await?;
        let reason = "Payment not received before the rental started";
        let mut released = 0;
        for booking in unpaid {
            if !self
                .store
                .release_unpaid_booking(&booking.id, reason, now)
                .await?
            {
                continue;
            }
            released += 1;
            tracing::info!(booking_id = %booking.id, "Unpaid booking released");

            if let Err(e) = self
                .release_vehicle_if_idle(&booking.vehicle_id, None, now)
                .await
            {
                tracing::error!(
                    error = %e,
                    booking_id = %booking.id,
                    vehicle_id = %booking.vehicle_id,
                    "Failed to release vehicle after unpaid hold"
                );
            }
            self.notifications.dispatch(Notification::new(
                NotificationEvent::BookingCancelled,
                Recipient::User(booking.renter_id.clone()),
                json!({ "booking_id": booking.id, "reason": reason }),
            ));
        }
        Ok(released)
    }

    /// Remind renters once about paid bookings starting within the lead time.
    pub async fn send_reminders(&self) -> Result<u64, BookingError> {
        let now = self.clock.now();
        let until = now + self.reminder_lead;
        let upcoming = self
            .store
            .find_bookings(&BookingSweepQuery::ReminderDue { now, until })
            .await?;
        let mut sent = 0;
        for booking in upcoming {
            if !self.store.mark_reminder_sent(&booking.id, now).await? {
                continue;
            }
            sent += 1;
            self.notifications.dispatch(Notification::new(
                NotificationEvent::BookingReminder,
                Recipient::User(booking.renter_id.clone()),
                json!({
                    "booking_id": booking.id,
                    "vehicle_id": booking.vehicle_id,
                    "start": booking.start,
                }),
            ));
        }
        Ok(sent)
    }
}
