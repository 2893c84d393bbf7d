use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    error::TRANSIENT_TRANSACTION_ERROR,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, UpdateOptions},
    ClientSession,
};
use std::time::Duration;

use super::{
    BookingSweepQuery, CancelOutcome, FailureOutcome, InsertOutcome, LedgerStore,
    PaymentSuccess, SuccessOutcome,
};
use crate::models::{Booking, BookingStatus, PaymentProvider, PaymentStatus, Transaction, TransactionStatus};
use crate::services::database::MongoDb;
use crate::services::error::StoreError;
use crate::services::reconciliation::{settle_success, SuccessDecision};

/// MongoDB-backed ledger. Requires a replica set for multi-document transactions.
#[derive(Clone)]
pub struct MongoLedgerStore {
    db: MongoDb,
}

fn ts(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(value)
}

fn holding_statuses() -> Vec<&'static str> {
    BookingStatus::HOLDING.iter().map(|s| s.as_str()).collect()
}

fn transient_only(err: mongodb::error::Error) -> backoff::Error<mongodb::error::Error> {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        tracing::debug!(error = %err, "Transient transaction error, retrying");
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

fn conflict_retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

fn sweep_filter(query: &BookingSweepQuery) -> Document {
    let paid = PaymentStatus::Paid.as_str();
    let approved = BookingStatus::Approved.as_str();
    match query {
        BookingSweepQuery::DueForCompletion { now, vendor_id } => {
            let mut filter = doc! {
                "status": approved,
                "payment.status": paid,
                "end": { "$lt": ts(*now) },
            };
            if let Some(vendor_id) = vendor_id {
                filter.insert("vendor_id", vendor_id.as_str());
            }
            filter
        }
        BookingSweepQuery::InProgress { now } => doc! {
            "status": approved,
            "payment.status": paid,
            "start": { "$lte": ts(*now) },
            "end": { "$gte": ts(*now) },
        },
        BookingSweepQuery::UnpaidPastStart { now } => doc! {
            "status": approved,
            "payment.status": { "$ne": paid },
            "start": { "$lt": ts(*now) },
        },
        BookingSweepQuery::ReminderDue { now, until } => doc! {
            "status": approved,
            "payment.status": paid,
            "reminder_sent": { "$ne": true },
            "start": { "$gte": ts(*now), "$lte": ts(*until) },
        },
    }
}

impl MongoLedgerStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    async fn start_transaction(&self) -> Result<ClientSession, mongodb::error::Error> {
        let mut session = self.db.client().start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(session)
    }

    async fn try_insert_booking(
        &self,
        booking: &Booking,
    ) -> Result<InsertOutcome, mongodb::error::Error> {
        let mut session = self.start_transaction().await?;

        self.db
            .booking_guards()
            .update_one_with_session(
                doc! { "_id": &booking.vehicle_id },
                doc! { "$inc": { "seq": 1_i64 } },
                UpdateOptions::builder().upsert(true).build(),
                &mut session,
            )
            .await?;

        let conflict = self
            .db
            .bookings()
            .find_one_with_session(
                doc! {
                    "vehicle_id": &booking.vehicle_id,
                    "status": { "$in": holding_statuses() },
                    "start": { "$lte": ts(booking.end) },
                    "end": { "$gte": ts(booking.start) },
                },
                None,
                &mut session,
            )
            .await?;

        if let Some(existing) = conflict {
            session.abort_transaction().await?;
            return Ok(InsertOutcome::Conflict(existing));
        }

        self.db
            .bookings()
            .insert_one_with_session(booking, None, &mut session)
            .await?;
        session.commit_transaction().await?;
        Ok(InsertOutcome::Inserted(booking.clone()))
    }

    async fn try_apply_success(
        &self,
        transaction_id: &str,
        success: &PaymentSuccess,
        now: DateTime<Utc>,
    ) -> Result<Result<SuccessOutcome, StoreError>, mongodb::error::Error> {
        let mut session = self.start_transaction().await?;

        let Some(mut transaction) = self
            .db
            .transactions()
            .find_one_with_session(doc! { "_id": transaction_id }, None, &mut session)
            .await?
        else {
            session.abort_transaction().await?;
            return Ok(Err(StoreError::Missing(format!("transaction {}", transaction_id))));
        };
        let Some(mut booking) = self
            .db
            .bookings()
            .find_one_with_session(doc! { "_id": &transaction.booking_id }, None, &mut session)
            .await?
        else {
            session.abort_transaction().await?;
            return Ok(Err(StoreError::Missing(format!(
                "booking {}",
                transaction.booking_id
            ))));
        };

        let decision = settle_success(&mut booking, &mut transaction, success, now);
        if decision == SuccessDecision::MarkPaid {
            self.db
                .bookings()
                .replace_one_with_session(doc! { "_id": &booking.id }, &booking, None, &mut session)
                .await?;
        }
        if decision != SuccessDecision::AlreadyApplied {
            self.db
                .transactions()
                .replace_one_with_session(
                    doc! { "_id": &transaction.id },
                    &transaction,
                    None,
                    &mut session,
                )
                .await?;
        }
        session.commit_transaction().await?;

        let outcome = match decision {
            SuccessDecision::MarkPaid => SuccessOutcome::Applied {
                booking,
                transaction,
            },
            SuccessDecision::AlreadyApplied => SuccessOutcome::AlreadyApplied { transaction },
            SuccessDecision::DuplicateAttempt => SuccessOutcome::PaidByOtherAttempt { transaction },
            SuccessDecision::InactiveBooking => SuccessOutcome::BookingInactive {
                booking,
                transaction,
            },
        };
        Ok(Ok(outcome))
    }

    async fn conditional_update(
        &self,
        filter: Document,
        set: Document,
    ) -> Result<bool, StoreError> {
        let result = self
            .db
            .bookings()
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn insert_booking_if_free(&self, booking: Booking) -> Result<InsertOutcome, StoreError> {
        let outcome = retry(conflict_retry_policy(), || async {
            self.try_insert_booking(&booking)
                .await
                .map_err(transient_only)
        })
        .await?;
        Ok(outcome)
    }

    async fn find_booking(&self, id: &str) -> Result<Option<Booking>, StoreError> {
        Ok(self.db.bookings().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_bookings_for_renter(&self, renter_id: &str) -> Result<Vec<Booking>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self
            .db
            .bookings()
            .find(doc! { "renter_id": renter_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn cancel_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let cancelled = self
            .db
            .bookings()
            .find_one_and_update(
                doc! {
                    "_id": id,
                    "status": { "$in": holding_statuses() },
                    "payment.status": { "$ne": PaymentStatus::Paid.as_str() },
                },
                doc! { "$set": {
                    "status": BookingStatus::Cancelled.as_str(),
                    "cancellation_reason": reason,
                    "updated_at": ts(now),
                }},
                options,
            )
            .await?;
        if let Some(booking) = cancelled {
            return Ok(CancelOutcome::Cancelled(booking));
        }

        Ok(match self.find_booking(id).await? {
            None => CancelOutcome::NotFound,
            Some(b) if b.is_paid() => CancelOutcome::AlreadyPaid,
            Some(b) => CancelOutcome::NotCancellable(b.status),
        })
    }

    async fn has_active_booking(
        &self,
        vehicle_id: &str,
        now: DateTime<Utc>,
        excluding: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut filter = doc! {
            "vehicle_id": vehicle_id,
            "status": { "$in": holding_statuses() },
            "start": { "$lte": ts(now) },
            "end": { "$gte": ts(now) },
        };
        if let Some(excluded) = excluding {
            filter.insert("_id", doc! { "$ne": excluded });
        }
        let count = self
            .db
            .bookings()
            .count_documents(filter, None)
            .await?;
        Ok(count > 0)
    }

    async fn find_bookings(&self, query: &BookingSweepQuery) -> Result<Vec<Booking>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "end": 1 }).build();
        let cursor = self
            .db
            .bookings()
            .find(sweep_filter(query), options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn complete_booking(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.conditional_update(
            doc! {
                "_id": id,
                "status": BookingStatus::Approved.as_str(),
                "payment.status": PaymentStatus::Paid.as_str(),
            },
            doc! {
                "status": BookingStatus::Completed.as_str(),
                "updated_at": ts(now),
            },
        )
        .await
    }

    async fn release_unpaid_booking(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.conditional_update(
            doc! {
                "_id": id,
                "status": BookingStatus::Approved.as_str(),
                "payment.status": { "$ne": PaymentStatus::Paid.as_str() },
            },
            doc! {
                "status": BookingStatus::Cancelled.as_str(),
                "cancellation_reason": reason,
                "updated_at": ts(now),
            },
        )
        .await
    }

    async fn mark_reminder_sent(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.conditional_update(
            doc! { "_id": id, "reminder_sent": { "$ne": true } },
            doc! { "reminder_sent": true, "updated_at": ts(now) },
        )
        .await
    }

    async fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        self.db
            .transactions()
            .insert_one(&transaction, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::Duplicate(format!(
                        "provider reference {}:{}",
                        transaction.provider, transaction.provider_id
                    ))
                } else {
                    StoreError::from(e)
                }
            })?;
        Ok(())
    }

    async fn find_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .db
            .transactions()
            .find_one(doc! { "_id": id }, None)
            .await?)
    }

    async fn find_transaction_by_reference(
        &self,
        provider: PaymentProvider,
        provider_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .db
            .transactions()
            .find_one(
                doc! { "provider": provider.as_str(), "provider_id": provider_id },
                None,
            )
            .await?)
    }

    async fn list_transactions_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();
        let cursor = self
            .db
            .transactions()
            .find(doc! { "booking_id": booking_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn apply_payment_success(
        &self,
        transaction_id: &str,
        success: &PaymentSuccess,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome, StoreError> {
        retry(conflict_retry_policy(), || async {
            self.try_apply_success(transaction_id, success, now)
                .await
                .map_err(transient_only)
        })
        .await?
    }

    async fn apply_payment_failure(
        &self,
        transaction_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let failed = self
            .db
            .transactions()
            .find_one_and_update(
                doc! { "_id": transaction_id, "status": TransactionStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": TransactionStatus::Failed.as_str(),
                    "error": reason,
                    "updated_at": ts(now),
                }},
                options,
            )
            .await?;
        if let Some(transaction) = failed {
            return Ok(FailureOutcome::Recorded(transaction));
        }
        match self.find_transaction(transaction_id).await? {
            Some(t) => Ok(FailureOutcome::Ignored(t.status)),
            None => Err(StoreError::Missing(format!("transaction {}", transaction_id))),
        }
    }

    async fn fail_stale_transactions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = self
            .db
            .transactions()
            .update_many(
                doc! {
                    "status": TransactionStatus::Pending.as_str(),
                    "created_at": { "$lt": ts(cutoff) },
                },
                doc! { "$set": {
                    "status": TransactionStatus::Failed.as_str(),
                    "error": reason,
                    "updated_at": ts(now),
                }},
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.health_check().await
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == 11000
    )
}
