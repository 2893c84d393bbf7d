//! Persistence seam for bookings and charge attempts.
//!
//! Every method is one atomic unit: an implementation either applies the whole
//! write or none of it. The decisions about *what* to write during
//! reconciliation live in [`crate::services::reconciliation`] so both
//! implementations agree on them.

mod memory;
mod mongo;

pub use memory::InMemoryLedgerStore;
pub use mongo::MongoLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Booking, BookingStatus, PaymentProvider, Transaction, TransactionStatus};
use crate::services::error::StoreError;

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Booking),
    /// Nothing was written; the booking that already holds the window.
    Conflict(Booking),
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Booking),
    AlreadyPaid,
    NotCancellable(BookingStatus),
    NotFound,
}

/// Selections used by the scheduled sweeps.
#[derive(Debug, Clone)]
pub enum BookingSweepQuery {
    /// Approved, paid and `end < now`. Optionally restricted to one vendor.
    DueForCompletion {
        now: DateTime<Utc>,
        vendor_id: Option<String>,
    },
    /// Approved, paid and `start <= now <= end`.
    InProgress { now: DateTime<Utc> },
    /// Approved, unpaid and `start < now`.
    UnpaidPastStart { now: DateTime<Utc> },
    /// Approved, paid, no reminder yet, and `now <= start <= until`.
    ReminderDue {
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

impl BookingSweepQuery {
    pub fn matches(&self, booking: &Booking) -> bool {
        let paid_and_approved = booking.is_confirmed();
        match self {
            Self::DueForCompletion { now, vendor_id } => {
                paid_and_approved
                    && booking.end < *now
                    && vendor_id.as_ref().is_none_or(|v| *v == booking.vendor_id)
            }
            Self::InProgress { now } => paid_and_approved && booking.window_contains(*now),
            Self::UnpaidPastStart { now } => {
                booking.status == BookingStatus::Approved && !booking.is_paid() && booking.start < *now
            }
            Self::ReminderDue { now, until } => {
                paid_and_approved
                    && !booking.reminder_sent
                    && booking.start >= *now
                    && booking.start <= *until
            }
        }
    }
}

/// A verified success reported by a provider for one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSuccess {
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
}

#[derive(Debug, Clone)]
pub enum SuccessOutcome {
    /// Booking marked paid and the attempt completed.
    Applied {
        booking: Booking,
        transaction: Transaction,
    },
    /// Seen before; nothing changed.
    AlreadyApplied { transaction: Transaction },
    /// The booking was paid through a different attempt; this attempt was
    /// failed and flagged for refund.
    PaidByOtherAttempt { transaction: Transaction },
    /// The booking is cancelled, rejected or otherwise no longer active; the
    /// attempt was completed and flagged for refund, the booking untouched.
    BookingInactive {
        booking: Booking,
        transaction: Transaction,
    },
}

#[derive(Debug, Clone)]
pub enum FailureOutcome {
    Recorded(Transaction),
    /// The attempt had already left `pending`; success is sticky.
    Ignored(TransactionStatus),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert `booking` unless a slot-holding booking for the same vehicle
    /// overlaps its window. Check and insert are atomic per vehicle.
    async fn insert_booking_if_free(&self, booking: Booking) -> Result<InsertOutcome, StoreError>;

    async fn find_booking(&self, id: &str) -> Result<Option<Booking>, StoreError>;

    /// Newest first.
    async fn list_bookings_for_renter(&self, renter_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// `pending|approved -> cancelled`, only while unpaid.
    async fn cancel_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, StoreError>;

    /// Whether any slot-holding booking for the vehicle contains `now`.
    async fn has_active_booking(
        &self,
        vehicle_id: &str,
        now: DateTime<Utc>,
        excluding: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn find_bookings(&self, query: &BookingSweepQuery) -> Result<Vec<Booking>, StoreError>;

    /// `approved -> completed` for a paid booking. False when it was already moved.
    async fn complete_booking(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// `approved -> cancelled` for a booking that is still unpaid.
    async fn release_unpaid_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_reminder_sent(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError>;

    async fn find_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError>;

    async fn find_transaction_by_reference(
        &self,
        provider: PaymentProvider,
        provider_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn list_transactions_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Apply a verified success to the attempt and its booking together.
    async fn apply_payment_success(
        &self,
        transaction_id: &str,
        success: &PaymentSuccess,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome, StoreError>;

    /// Fail the attempt if, and only if, it is still pending.
    async fn apply_payment_failure(
        &self,
        transaction_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError>;

    /// Fail every pending attempt created before `cutoff`. Returns how many moved.
    async fn fail_stale_transactions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
