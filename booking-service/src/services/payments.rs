use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{PaymentProvider, Principal, Transaction, TransactionStatus, TransactionType};
use crate::services::clock::Clock;
use crate::services::error::BookingError;
use crate::services::gateways::{ChargeReference, ChargeRequest, GatewayError, GatewayRegistry};
use crate::services::metrics::record_charge_initiated;
use crate::services::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct InitiatedCharge {
    pub transaction: Transaction,
    pub reference: ChargeReference,
}

/// Opens charge attempts with the chosen provider.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    gateways: GatewayRegistry,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn LedgerStore>, gateways: GatewayRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            gateways,
            clock,
        }
    }

    /// Create a provider-side charge and record it as a pending attempt
    /// before handing the reference back.
    pub async fn initiate_charge(
        &self,
        principal: &Principal,
        booking_id: &str,
        provider: PaymentProvider,
    ) -> Result<InitiatedCharge, BookingError> {
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking".to_string()))?;
        if booking.renter_id != principal.user_id {
            return Err(BookingError::Forbidden(
                "only the renter can pay for a booking".to_string(),
            ));
        }
        if booking.is_paid() {
            return Err(BookingError::AlreadyPaid);
        }
        if !booking.status.holds_slot() {
            return Err(BookingError::NotChargeable(booking.status));
        }

        let gateway = self.gateways.get(provider);
        if !gateway.is_configured() {
            tracing::error!(provider = %provider, "Charge requested for unconfigured provider");
            return Err(BookingError::GatewayNotConfigured(provider));
        }

        let attempt_id = Uuid::new_v4().to_string();
        let request = ChargeRequest {
            attempt_id: attempt_id.clone(),
            booking_id: booking.id.clone(),
            user_id: principal.user_id.clone(),
            amount: booking.total_amount,
            currency: booking.currency.clone(),
        };
        let reference = gateway.create_charge(&request).await.map_err(|e| match e {
            GatewayError::NotConfigured(p) => BookingError::GatewayNotConfigured(p),
            other => {
                tracing::error!(provider = %provider, booking_id = %booking.id, error = %other, "Charge creation failed");
                BookingError::Gateway(other)
            }
        })?;

        let now = self.clock.now();
        let transaction = Transaction {
            id: attempt_id,
            booking_id: booking.id.clone(),
            user_id: principal.user_id.clone(),
            amount: booking.total_amount,
            currency: booking.currency.clone(),
            kind: TransactionType::Charge,
            provider,
            provider_id: reference.provider_id.clone(),
            status: TransactionStatus::Pending,
            metadata: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_transaction(transaction.clone()).await?;

        record_charge_initiated(provider);
        tracing::info!(
            transaction_id = %transaction.id,
            booking_id = %booking.id,
            provider = %provider,
            provider_id = %transaction.provider_id,
            amount = transaction.amount,
            "Charge attempt recorded"
        );

        Ok(InitiatedCharge {
            transaction,
            reference,
        })
    }
}
