//! Payment gateway adapters.
//!
//! Each provider implements [`PaymentGateway`]: create a charge request for a
//! booking and verify provider events against the raw request body. The
//! provider is picked once, at charge time, from the closed
//! [`PaymentProvider`] set.

mod razorpay;
mod stripe;

pub use razorpay::{RazorpayGateway, RAZORPAY_SIGNATURE_HEADER};
pub use stripe::{StripeGateway, STRIPE_SIGNATURE_HEADER};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::PaymentProvider;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0} credentials not configured")]
    NotConfigured(PaymentProvider),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {code}: {message}")]
    Api {
        provider: PaymentProvider,
        code: String,
        message: String,
    },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Operation not supported by {0}")]
    Unsupported(PaymentProvider),

    #[error("Signature computation failed: {0}")]
    Crypto(String),
}

/// What the gateway needs to open one charge attempt.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Our transaction id; doubles as the provider idempotency key / receipt.
    pub attempt_id: String,
    pub booking_id: String,
    pub user_id: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
}

/// The provider's handle on a charge attempt plus whatever the client needs
/// to complete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReference {
    pub provider: PaymentProvider,
    /// Payment intent id (Stripe) or order id (Razorpay).
    pub provider_id: String,
    /// Stripe only.
    pub client_secret: Option<String>,
    /// Publishable key (Stripe) or key id (Razorpay).
    pub public_key: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded { provider_payment_id: String },
    Failed { reason: String },
    /// Authentic, but not an event the ledger reacts to.
    Ignored,
}

/// A provider event whose signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    pub event_type: String,
    /// The attempt reference the event refers to (`provider_id` on the transaction).
    pub reference: Option<String>,
    pub kind: PaymentEventKind,
}

/// Values returned by a checkout widget for client-side confirmation.
#[derive(Debug, Clone)]
pub struct CheckoutConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    fn is_configured(&self) -> bool;

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeReference, GatewayError>;

    /// Verify `raw_body` against the provider's signature header and parse it.
    /// Nothing is parsed before the signature checks out.
    fn verify_event(&self, raw_body: &[u8], signature: &str) -> Result<PaymentEvent, GatewayError>;

    /// Verify a client-submitted checkout result.
    fn verify_checkout(
        &self,
        _confirmation: &CheckoutConfirmation,
    ) -> Result<PaymentEvent, GatewayError> {
        Err(GatewayError::Unsupported(self.provider()))
    }
}

/// Both adapters, addressed by provider.
#[derive(Clone)]
pub struct GatewayRegistry {
    stripe: Arc<dyn PaymentGateway>,
    razorpay: Arc<dyn PaymentGateway>,
}

impl GatewayRegistry {
    pub fn new(stripe: Arc<dyn PaymentGateway>, razorpay: Arc<dyn PaymentGateway>) -> Self {
        Self { stripe, razorpay }
    }

    pub fn get(&self, provider: PaymentProvider) -> &Arc<dyn PaymentGateway> {
        match provider {
            PaymentProvider::Stripe => &self.stripe,
            PaymentProvider::Razorpay => &self.razorpay,
        }
    }
}
