use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    BookingSweepQuery, CancelOutcome, FailureOutcome, InsertOutcome, LedgerStore,
    PaymentSuccess, SuccessOutcome,
};
use crate::models::{Booking, BookingStatus, PaymentProvider, Transaction, TransactionStatus};
use crate::services::error::StoreError;
use crate::services::overlap::find_conflict;
use crate::services::reconciliation::{settle_failure, settle_success, SuccessDecision};

#[derive(Default)]
struct Ledger {
    bookings: HashMap<String, Booking>,
    transactions: HashMap<String, Transaction>,
}

/// Ledger held in process memory behind a single lock.
///
/// Used by tests and local runs without MongoDB.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Ledger>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed or overwrite a booking as-is, bypassing the overlap check.
    pub fn put_booking(&self, booking: Booking) {
        self.lock().bookings.insert(booking.id.clone(), booking);
    }

    /// Seed or overwrite a transaction as-is.
    pub fn put_transaction(&self, transaction: Transaction) {
        self.lock()
            .transactions
            .insert(transaction.id.clone(), transaction);
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.lock().bookings.values().cloned().collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().transactions.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_booking_if_free(&self, booking: Booking) -> Result<InsertOutcome, StoreError> {
        let mut ledger = self.lock();
        if let Some(existing) = find_conflict(
            ledger.bookings.values(),
            &booking.vehicle_id,
            booking.start,
            booking.end,
        ) {
            return Ok(InsertOutcome::Conflict(existing.clone()));
        }
        ledger.bookings.insert(booking.id.clone(), booking.clone());
        Ok(InsertOutcome::Inserted(booking))
    }

    async fn find_booking(&self, id: &str) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock().bookings.get(id).cloned())
    }

    async fn list_bookings_for_renter(&self, renter_id: &str) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.renter_id == renter_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn cancel_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, StoreError> {
        let mut ledger = self.lock();
        let Some(booking) = ledger.bookings.get_mut(id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if booking.is_paid() {
            return Ok(CancelOutcome::AlreadyPaid);
        }
        if !booking.status.holds_slot() {
            return Ok(CancelOutcome::NotCancellable(booking.status));
        }
        booking.status = BookingStatus::Cancelled;
        booking.cancellation_reason = Some(reason.to_string());
        booking.updated_at = now;
        Ok(CancelOutcome::Cancelled(booking.clone()))
    }

    async fn has_active_booking(
        &self,
        vehicle_id: &str,
        now: DateTime<Utc>,
        excluding: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.lock().bookings.values().any(|b| {
            b.vehicle_id == vehicle_id
                && b.status.holds_slot()
                && b.window_contains(now)
                && excluding != Some(b.id.as_str())
        }))
    }

    async fn find_bookings(&self, query: &BookingSweepQuery) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.end.cmp(&b.end));
        Ok(bookings)
    }

    async fn complete_booking(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut ledger = self.lock();
        match ledger.bookings.get_mut(id) {
            Some(b) if b.is_confirmed() => {
                b.status = BookingStatus::Completed;
                b.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_unpaid_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut ledger = self.lock();
        match ledger.bookings.get_mut(id) {
            Some(b) if b.status == BookingStatus::Approved && !b.is_paid() => {
                b.status = BookingStatus::Cancelled;
                b.cancellation_reason = Some(reason.to_string());
                b.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_reminder_sent(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut ledger = self.lock();
        match ledger.bookings.get_mut(id) {
            Some(b) if !b.reminder_sent => {
                b.reminder_sent = true;
                b.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut ledger = self.lock();
        let duplicate = ledger.transactions.values().any(|t| {
            t.provider == transaction.provider && t.provider_id == transaction.provider_id
        });
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "duplicate provider reference {}:{}",
                transaction.provider, transaction.provider_id
            )));
        }
        ledger
            .transactions
            .insert(transaction.id.clone(), transaction);
        Ok(())
    }

    async fn find_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.lock().transactions.get(id).cloned())
    }

    async fn find_transaction_by_reference(
        &self,
        provider: PaymentProvider,
        provider_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .find(|t| t.provider == provider && t.provider_id == provider_id)
            .cloned())
    }

    async fn list_transactions_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut transactions: Vec<Transaction> = self
            .lock()
            .transactions
            .values()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(transactions)
    }

    async fn apply_payment_success(
        &self,
        transaction_id: &str,
        success: &PaymentSuccess,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome, StoreError> {
        let mut ledger = self.lock();
        let mut transaction = ledger
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(format!("transaction {}", transaction_id)))?;
        let mut booking = ledger
            .bookings
            .get(&transaction.booking_id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(format!("booking {}", transaction.booking_id)))?;

        let decision = settle_success(&mut booking, &mut transaction, success, now);
        let outcome = match decision {
            SuccessDecision::AlreadyApplied => SuccessOutcome::AlreadyApplied { transaction },
            SuccessDecision::MarkPaid => {
                ledger.bookings.insert(booking.id.clone(), booking.clone());
                ledger
                    .transactions
                    .insert(transaction.id.clone(), transaction.clone());
                SuccessOutcome::Applied {
                    booking,
                    transaction,
                }
            }
            SuccessDecision::DuplicateAttempt => {
                ledger
                    .transactions
                    .insert(transaction.id.clone(), transaction.clone());
                SuccessOutcome::PaidByOtherAttempt { transaction }
            }
            SuccessDecision::InactiveBooking => {
                ledger
                    .transactions
                    .insert(transaction.id.clone(), transaction.clone());
                SuccessOutcome::BookingInactive {
                    booking,
                    transaction,
                }
            }
        };
        Ok(outcome)
    }

    async fn apply_payment_failure(
        &self,
        transaction_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError> {
        let mut ledger = self.lock();
        let transaction = ledger
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::Missing(format!("transaction {}", transaction_id)))?;
        if settle_failure(transaction, reason, now) {
            Ok(FailureOutcome::Recorded(transaction.clone()))
        } else {
            Ok(FailureOutcome::Ignored(transaction.status))
        }
    }

    async fn fail_stale_transactions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut ledger = self.lock();
        let mut moved = 0;
        for transaction in ledger
            .transactions
            .values_mut()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
        {
            if settle_failure(transaction, reason, now) {
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
