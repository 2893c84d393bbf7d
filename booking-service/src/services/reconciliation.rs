//! Applies verified provider events to the ledger.
//!
//! Success is sticky: once an attempt is completed (or a booking is paid),
//! later failures and duplicate successes change nothing. Webhooks and the
//! client-side checkout confirmation both funnel into [`ReconciliationEngine::apply`]
//! and therefore reach the same outcome in any order.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::models::{
    Booking, BookingStatus, PaymentProvider, PaymentRecord, PaymentStatus, Principal,
    Transaction, TransactionStatus, REFUND_REQUIRED_KEY,
};
use crate::services::clock::Clock;
use crate::services::error::BookingError;
use crate::services::gateways::{
    CheckoutConfirmation, GatewayError, GatewayRegistry, PaymentEvent, PaymentEventKind,
};
use crate::services::metrics::{record_payment_event, record_webhook_rejected};
use crate::services::notifier::{
    Channel, Notification, NotificationDispatcher, NotificationEvent, Recipient,
};
use crate::services::realtime::RealtimeChannel;
use crate::services::store::{FailureOutcome, LedgerStore, PaymentSuccess, SuccessOutcome};

pub const PROVIDER_PAYMENT_ID_KEY: &str = "provider_payment_id";
pub const DUPLICATE_ATTEMPT_ERROR: &str = "booking already paid by another attempt; refund required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessDecision {
    /// Mark the booking paid and complete the attempt.
    MarkPaid,
    /// Nothing to do.
    AlreadyApplied,
    /// Booking was paid by a different attempt: fail this one, flag refund.
    DuplicateAttempt,
    /// Booking no longer holds its slot: complete the attempt, flag refund,
    /// leave the booking alone.
    InactiveBooking,
}

/// Decide how a verified success changes `booking` and `transaction`, and
/// apply that change to the given copies. The caller persists what the
/// decision says was touched.
pub fn settle_success(
    booking: &mut Booking,
    transaction: &mut Transaction,
    success: &PaymentSuccess,
    now: DateTime<Utc>,
) -> SuccessDecision {
    let settled = matches!(
        transaction.status,
        TransactionStatus::Completed | TransactionStatus::Refunded
    );
    if settled || transaction.refund_required() {
        return SuccessDecision::AlreadyApplied;
    }

    transaction.metadata.insert(
        PROVIDER_PAYMENT_ID_KEY.to_string(),
        success.provider_payment_id.clone(),
    );
    transaction.updated_at = now;

    if booking.is_paid() {
        transaction.status = TransactionStatus::Failed;
        transaction.error = Some(DUPLICATE_ATTEMPT_ERROR.to_string());
        transaction
            .metadata
            .insert(REFUND_REQUIRED_KEY.to_string(), "true".to_string());
        return SuccessDecision::DuplicateAttempt;
    }

    if !booking.status.holds_slot() {
        transaction.status = TransactionStatus::Completed;
        transaction.error = None;
        transaction
            .metadata
            .insert(REFUND_REQUIRED_KEY.to_string(), "true".to_string());
        transaction
            .metadata
            .insert("booking_status".to_string(), booking.status.as_str().to_string());
        return SuccessDecision::InactiveBooking;
    }

    booking.payment = PaymentRecord {
        provider: Some(success.provider),
        provider_payment_id: Some(success.provider_payment_id.clone()),
        status: PaymentStatus::Paid,
    };
    booking.status = BookingStatus::Approved;
    booking.updated_at = now;

    transaction.status = TransactionStatus::Completed;
    transaction.error = None;
    SuccessDecision::MarkPaid
}

/// Fail the attempt only while it is still pending. Returns whether it moved.
pub fn settle_failure(transaction: &mut Transaction, reason: &str, now: DateTime<Utc>) -> bool {
    if transaction.status != TransactionStatus::Pending {
        return false;
    }
    transaction.status = TransactionStatus::Failed;
    transaction.error = Some(reason.to_string());
    transaction.updated_at = now;
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    AlreadyApplied,
    DuplicateAttempt,
    RefundRequired,
    FailureRecorded,
    FailureIgnored,
    UnknownReference,
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::DuplicateAttempt => "duplicate_attempt",
            Self::RefundRequired => "refund_required",
            Self::FailureRecorded => "failure_recorded",
            Self::FailureIgnored => "failure_ignored",
            Self::UnknownReference => "unknown_reference",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    gateways: GatewayRegistry,
    clock: Arc<dyn Clock>,
    notifications: NotificationDispatcher,
    realtime: Arc<dyn RealtimeChannel>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateways: GatewayRegistry,
        clock: Arc<dyn Clock>,
        notifications: NotificationDispatcher,
        realtime: Arc<dyn RealtimeChannel>,
    ) -> Self {
        Self {
            store,
            gateways,
            clock,
            notifications,
            realtime,
        }
    }

    /// Verify and apply one webhook delivery. The body must be the raw bytes
    /// the provider signed.
    pub async fn handle_webhook(
        &self,
        provider: PaymentProvider,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<ReconcileOutcome, BookingError> {
        let event = match self.gateways.get(provider).verify_event(raw_body, signature) {
            Ok(event) => event,
            Err(GatewayError::InvalidSignature) => {
                tracing::warn!(
                    provider = %provider,
                    security_event = true,
                    "Webhook signature verification failed"
                );
                record_webhook_rejected(provider);
                return Err(BookingError::InvalidSignature);
            }
            Err(GatewayError::Malformed(reason)) => {
                tracing::error!(provider = %provider, reason = %reason, "Verified webhook could not be parsed");
                record_payment_event(provider, ReconcileOutcome::Ignored.as_str());
                return Ok(ReconcileOutcome::Ignored);
            }
            Err(e) => return Err(BookingError::Gateway(e)),
        };

        tracing::info!(
            provider = %provider,
            event_type = %event.event_type,
            reference = ?event.reference,
            "Processing payment webhook"
        );
        self.apply(event).await
    }

    /// Client-submitted confirmation from the Razorpay checkout widget.
    pub async fn verify_checkout(
        &self,
        principal: &Principal,
        confirmation: &CheckoutConfirmation,
    ) -> Result<ReconcileOutcome, BookingError> {
        let provider = PaymentProvider::Razorpay;
        let transaction = self
            .store
            .find_transaction_by_reference(provider, &confirmation.order_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Transaction".to_string()))?;
        if transaction.user_id != principal.user_id {
            return Err(BookingError::Forbidden(
                "transaction belongs to another user".to_string(),
            ));
        }

        let event = match self.gateways.get(provider).verify_checkout(confirmation) {
            Ok(event) => event,
            Err(GatewayError::InvalidSignature) => {
                tracing::warn!(
                    provider = %provider,
                    order_id = %confirmation.order_id,
                    user_id = %principal.user_id,
                    security_event = true,
                    "Checkout signature verification failed"
                );
                record_webhook_rejected(provider);
                return Err(BookingError::InvalidSignature);
            }
            Err(e) => return Err(BookingError::Gateway(e)),
        };
        self.apply(event).await
    }

    /// Apply an already-verified event.
    pub async fn apply(&self, event: PaymentEvent) -> Result<ReconcileOutcome, BookingError> {
        let provider = event.provider;
        let outcome = self.apply_inner(event).await?;
        record_payment_event(provider, outcome.as_str());
        Ok(outcome)
    }

    async fn apply_inner(&self, event: PaymentEvent) -> Result<ReconcileOutcome, BookingError> {
        if event.kind == PaymentEventKind::Ignored {
            tracing::debug!(event_type = %event.event_type, "Payment event ignored");
            return Ok(ReconcileOutcome::Ignored);
        }
        let Some(reference) = event.reference.as_deref() else {
            tracing::warn!(event_type = %event.event_type, "Payment event without attempt reference");
            return Ok(ReconcileOutcome::Ignored);
        };
        let Some(transaction) = self
            .store
            .find_transaction_by_reference(event.provider, reference)
            .await?
        else {
            tracing::warn!(
                provider = %event.provider,
                reference = %reference,
                event_type = %event.event_type,
                "Payment event for unknown reference acknowledged"
            );
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let now = self.clock.now();
        match event.kind {
            PaymentEventKind::Succeeded {
                provider_payment_id,
            } => {
                let success = PaymentSuccess {
                    provider: event.provider,
                    provider_payment_id,
                };
                let outcome = self
                    .store
                    .apply_payment_success(&transaction.id, &success, now)
                    .await?;
                Ok(self.after_success(outcome))
            }
            PaymentEventKind::Failed { reason } => {
                match self
                    .store
                    .apply_payment_failure(&transaction.id, &reason, now)
                    .await?
                {
                    FailureOutcome::Recorded(transaction) => {
                        tracing::info!(
                            transaction_id = %transaction.id,
                            booking_id = %transaction.booking_id,
                            reason = %reason,
                            "Charge attempt failed"
                        );
                        self.realtime.emit(
                            &transaction.user_id,
                            "payment.failed",
                            json!({ "booking_id": transaction.booking_id, "reason": reason }),
                        );
                        Ok(ReconcileOutcome::FailureRecorded)
                    }
                    FailureOutcome::Ignored(status) => {
                        tracing::info!(
                            transaction_id = %transaction.id,
                            status = status.as_str(),
                            "Failure event ignored for settled attempt"
                        );
                        Ok(ReconcileOutcome::FailureIgnored)
                    }
                }
            }
            PaymentEventKind::Ignored => Ok(ReconcileOutcome::Ignored),
        }
    }

    fn after_success(&self, outcome: SuccessOutcome) -> ReconcileOutcome {
        match outcome {
            SuccessOutcome::Applied {
                booking,
                transaction,
            } => {
                tracing::info!(
                    booking_id = %booking.id,
                    transaction_id = %transaction.id,
                    provider_payment_id = ?booking.payment.provider_payment_id,
                    "Booking marked paid"
                );
                let payload = json!({
                    "booking_id": booking.id,
                    "vehicle_id": booking.vehicle_id,
                    "amount": booking.total_amount,
                    "currency": booking.currency,
                    "start": booking.start,
                    "end": booking.end,
                });
                self.notifications.dispatch(
                    Notification::new(
                        NotificationEvent::PaymentSucceeded,
                        Recipient::User(booking.renter_id.clone()),
                        payload.clone(),
                    )
                    .with_channels(&[Channel::Email, Channel::Sms]),
                );
                self.notifications.dispatch(Notification::new(
                    NotificationEvent::PaymentReceived,
                    Recipient::User(booking.vendor_id.clone()),
                    payload.clone(),
                ));
                self.realtime
                    .emit(&booking.renter_id, NotificationEvent::PaymentSucceeded.as_str(), payload);
                ReconcileOutcome::Applied
            }
            SuccessOutcome::AlreadyApplied { transaction } => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    "Duplicate success event, nothing to apply"
                );
                ReconcileOutcome::AlreadyApplied
            }
            SuccessOutcome::PaidByOtherAttempt { transaction } => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    booking_id = %transaction.booking_id,
                    "Second successful charge for a paid booking, refund required"
                );
                self.notify_refund(&transaction, "booking already paid by another attempt");
                ReconcileOutcome::DuplicateAttempt
            }
            SuccessOutcome::BookingInactive {
                booking,
                transaction,
            } => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    booking_id = %booking.id,
                    booking_status = booking.status.as_str(),
                    "Payment captured for inactive booking, refund required"
                );
                self.notify_refund(&transaction, &format!("booking is {}", booking.status));
                ReconcileOutcome::RefundRequired
            }
        }
    }

    fn notify_refund(&self, transaction: &Transaction, reason: &str) {
        self.notifications.dispatch(Notification::new(
            NotificationEvent::PaymentRefundRequired,
            Recipient::Admins,
            json!({
                "transaction_id": transaction.id,
                "booking_id": transaction.booking_id,
                "user_id": transaction.user_id,
                "amount": transaction.amount,
                "currency": transaction.currency,
                "provider": transaction.provider,
                "provider_payment_id": transaction.metadata.get(PROVIDER_PAYMENT_ID_KEY),
                "reason": reason,
            }),
        ));
    }
}
