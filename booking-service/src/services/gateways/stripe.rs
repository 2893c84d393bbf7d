//! Stripe adapter.
//!
//! Charges are PaymentIntents confirmed by the client with Stripe.js. Webhooks
//! carry `Stripe-Signature: t=<unix>,v1=<hex>` where the digest is
//! `HMAC-SHA256("<t>.<raw_body>", webhook_secret)`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::utils::signature::verify_hmac_sha256_hex;
use std::sync::Arc;
use std::time::Duration;

use super::{
    ChargeReference, ChargeRequest, GatewayError, PaymentEvent, PaymentEventKind, PaymentGateway,
};
use crate::config::StripeConfig;
use crate::models::PaymentProvider;
use crate::services::clock::Clock;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    id: String,
    #[serde(default)]
    latest_charge: Option<String>,
    #[serde(default)]
    last_payment_error: Option<LastPaymentError>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    #[serde(default)]
    message: Option<String>,
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_signature_header(header: &str) -> Option<SignatureHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
    clock: Arc<dyn Clock>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Client::new(),
            config,
            clock,
        }
    }

    fn parse_event(body: &[u8]) -> Result<PaymentEvent, GatewayError> {
        let event: StripeEvent =
            serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let object = event.data.object;

        let (reference, kind) = match event.kind.as_str() {
            "payment_intent.succeeded" => {
                let provider_payment_id = object.latest_charge.unwrap_or_else(|| object.id.clone());
                (
                    Some(object.id),
                    PaymentEventKind::Succeeded {
                        provider_payment_id,
                    },
                )
            }
            "payment_intent.payment_failed" => {
                let reason = object
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Payment failed".to_string());
                (Some(object.id), PaymentEventKind::Failed { reason })
            }
            "payment_intent.canceled" => {
                let reason = object
                    .cancellation_reason
                    .map(|r| format!("Payment intent canceled: {}", r))
                    .unwrap_or_else(|| "Payment intent canceled".to_string());
                (Some(object.id), PaymentEventKind::Failed { reason })
            }
            _ => (None, PaymentEventKind::Ignored),
        };

        Ok(PaymentEvent {
            provider: PaymentProvider::Stripe,
            event_type: event.kind,
            reference,
            kind,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeReference, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured(PaymentProvider::Stripe));
        }

        let amount = request.amount.to_string();
        let currency = request.currency.to_lowercase();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[booking_id]", request.booking_id.as_str()),
            ("metadata[user_id]", request.user_id.as_str()),
            ("metadata[attempt_id]", request.attempt_id.as_str()),
        ];

        let url = format!(
            "{}/payment_intents",
            self.config.api_base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .header("Idempotency-Key", &request.attempt_id)
            .timeout(REQUEST_TIMEOUT)
            .form(&form[..])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(status = %status, "Stripe create payment intent response");

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<StripeErrorBody>(&text) {
                Ok(body) => (
                    body.error.code.unwrap_or(body.error.kind),
                    body.error.message.unwrap_or_default(),
                ),
                Err(_) => (status.as_u16().to_string(), text),
            };
            tracing::error!(code = %code, message = %message, "Stripe payment intent creation failed");
            return Err(GatewayError::Api {
                provider: PaymentProvider::Stripe,
                code,
                message,
            });
        }

        let intent: PaymentIntent =
            serde_json::from_str(&text).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        tracing::info!(
            payment_intent_id = %intent.id,
            amount = intent.amount,
            status = ?intent.status,
            booking_id = %request.booking_id,
            "Stripe payment intent created"
        );

        Ok(ChargeReference {
            provider: PaymentProvider::Stripe,
            provider_id: intent.id,
            client_secret: intent.client_secret,
            public_key: self.config.publishable_key.clone(),
            amount: intent.amount,
            currency: intent.currency.to_uppercase(),
        })
    }

    fn verify_event(&self, raw_body: &[u8], signature: &str) -> Result<PaymentEvent, GatewayError> {
        let header = parse_signature_header(signature).ok_or(GatewayError::InvalidSignature)?;

        let age = self.clock.now().timestamp().abs_diff(header.timestamp);
        if age > self.config.webhook_tolerance_secs.unsigned_abs() {
            tracing::warn!(age_secs = age, "Stripe webhook timestamp outside tolerance");
            return Err(GatewayError::InvalidSignature);
        }

        let mut signed = format!("{}.", header.timestamp).into_bytes();
        signed.extend_from_slice(raw_body);

        let secret = self.config.webhook_secret.expose_secret();
        let mut valid = false;
        for candidate in &header.signatures {
            if verify_hmac_sha256_hex(secret, &signed, candidate)
                .map_err(|e| GatewayError::Crypto(e.to_string()))?
            {
                valid = true;
                break;
            }
        }
        if !valid {
            return Err(GatewayError::InvalidSignature);
        }

        Self::parse_event(raw_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use secrecy::Secret;
    use serde_json::json;
    use service_core::utils::signature::hmac_sha256_hex;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOW: i64 = 1_780_000_000;

    fn config(base_url: &str) -> StripeConfig {
        StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            publishable_key: "pk_test_123".to_string(),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: base_url.to_string(),
            webhook_tolerance_secs: 300,
        }
    }

    fn gateway(base_url: &str) -> StripeGateway {
        let clock = ManualClock::new(Utc.timestamp_opt(NOW, 0).unwrap());
        StripeGateway::new(config(base_url), Arc::new(clock))
    }

    fn sign(body: &str, timestamp: i64, secret: &str) -> String {
        let digest = hmac_sha256_hex(secret, format!("{}.{}", timestamp, body).as_bytes()).unwrap();
        format!("t={},v1={}", timestamp, digest)
    }

    fn succeeded_body() -> String {
        json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_123", "latest_charge": "ch_9" } }
        })
        .to_string()
    }

    #[test]
    fn parses_signature_header() {
        let parsed = parse_signature_header("t=12,v1=abc,v0=old,v1=def").unwrap();
        assert_eq!(parsed.timestamp, 12);
        assert_eq!(parsed.signatures, vec!["abc", "def"]);
        assert!(parse_signature_header("v1=abc").is_none());
    }

    #[tokio::test]
    async fn creates_payment_intent_keyed_by_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("idempotency-key", "txn-1"))
            .and(body_string_contains("amount=30000"))
            .and(body_string_contains("currency=inr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "object": "payment_intent",
                "client_secret": "pi_123_secret_abc",
                "amount": 30000,
                "currency": "inr",
                "status": "requires_payment_method"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reference = gateway(&server.uri())
            .create_charge(&ChargeRequest {
                attempt_id: "txn-1".to_string(),
                booking_id: "booking-1".to_string(),
                user_id: "renter-1".to_string(),
                amount: 30000,
                currency: "INR".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(reference.provider_id, "pi_123");
        assert_eq!(reference.client_secret.as_deref(), Some("pi_123_secret_abc"));
        assert_eq!(reference.public_key, "pk_test_123");
        assert_eq!(reference.currency, "INR");
    }

    #[test]
    fn verifies_signed_success_event() {
        let body = succeeded_body();
        let event = gateway("http://localhost")
            .verify_event(body.as_bytes(), &sign(&body, NOW - 10, "whsec_test"))
            .unwrap();

        assert_eq!(event.reference.as_deref(), Some("pi_123"));
        assert_eq!(
            event.kind,
            PaymentEventKind::Succeeded {
                provider_payment_id: "ch_9".to_string()
            }
        );
    }

    #[test]
    fn rejects_wrong_secret_tampered_body_and_stale_timestamp() {
        let body = succeeded_body();
        let gateway = gateway("http://localhost");

        let wrong_secret = sign(&body, NOW, "whsec_other");
        assert!(matches!(
            gateway.verify_event(body.as_bytes(), &wrong_secret),
            Err(GatewayError::InvalidSignature)
        ));

        let valid = sign(&body, NOW, "whsec_test");
        let tampered = body.replace("pi_123", "pi_999");
        assert!(matches!(
            gateway.verify_event(tampered.as_bytes(), &valid),
            Err(GatewayError::InvalidSignature)
        ));

        let stale = sign(&body, NOW - 3600, "whsec_test");
        assert!(matches!(
            gateway.verify_event(body.as_bytes(), &stale),
            Err(GatewayError::InvalidSignature)
        ));

        for extreme in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
            assert!(matches!(
                gateway.verify_event(b"{}", extreme),
                Err(GatewayError::InvalidSignature)
            ));
        }
    }

    #[test]
    fn failure_event_uses_last_payment_error() {
        let body = json!({
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_123",
                "last_payment_error": { "message": "Your card was declined." }
            }}
        })
        .to_string();
        let event = gateway("http://localhost")
            .verify_event(body.as_bytes(), &sign(&body, NOW, "whsec_test"))
            .unwrap();
        assert_eq!(
            event.kind,
            PaymentEventKind::Failed {
                reason: "Your card was declined.".to_string()
            }
        );
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let body = json!({
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        })
        .to_string();
        let event = gateway("http://localhost")
            .verify_event(body.as_bytes(), &sign(&body, NOW, "whsec_test"))
            .unwrap();
        assert_eq!(event.kind, PaymentEventKind::Ignored);
        assert!(event.reference.is_none());
    }
}
