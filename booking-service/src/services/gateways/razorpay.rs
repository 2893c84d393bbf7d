//! Razorpay adapter.
//!
//! Charges are Razorpay orders created through the Orders API. The checkout
//! widget hands the client `(order_id, payment_id, signature)` where the
//! signature is `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`.
//! Webhooks carry `HMAC-SHA256(raw_body, webhook_secret)` in
//! `X-Razorpay-Signature`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::utils::signature::verify_hmac_sha256_hex;
use std::time::Duration;

use super::{
    ChargeReference, ChargeRequest, CheckoutConfirmation, GatewayError, PaymentEvent,
    PaymentEventKind, PaymentGateway,
};
use crate::config::RazorpayConfig;
use crate::models::PaymentProvider;

pub const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    /// Smallest currency unit (paise for INR).
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: OrderNotes<'a>,
}

#[derive(Debug, Serialize)]
struct OrderNotes<'a> {
    booking_id: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Wrapped<PaymentEntity>>,
    order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
}

#[derive(Clone)]
pub struct RazorpayGateway {
    client: Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn parse_event(body: &[u8]) -> Result<PaymentEvent, GatewayError> {
        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let payment = event.payload.payment.map(|p| p.entity);
        let order = event.payload.order.map(|o| o.entity);

        let (reference, kind) = match event.event.as_str() {
            "payment.captured" => {
                let payment = payment.ok_or_else(|| {
                    GatewayError::Malformed("payment.captured without payment entity".into())
                })?;
                (
                    payment.order_id,
                    PaymentEventKind::Succeeded {
                        provider_payment_id: payment.id,
                    },
                )
            }
            "order.paid" => {
                let order = order.ok_or_else(|| {
                    GatewayError::Malformed("order.paid without order entity".into())
                })?;
                let provider_payment_id = payment.map(|p| p.id).unwrap_or_else(|| order.id.clone());
                (
                    Some(order.id),
                    PaymentEventKind::Succeeded {
                        provider_payment_id,
                    },
                )
            }
            "payment.failed" => {
                let payment = payment.ok_or_else(|| {
                    GatewayError::Malformed("payment.failed without payment entity".into())
                })?;
                let reason = payment
                    .error_description
                    .unwrap_or_else(|| "Payment failed".to_string());
                (payment.order_id, PaymentEventKind::Failed { reason })
            }
            _ => (None, PaymentEventKind::Ignored),
        };

        Ok(PaymentEvent {
            provider: PaymentProvider::Razorpay,
            event_type: event.event,
            reference,
            kind,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeReference, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured(PaymentProvider::Razorpay));
        }

        let body = CreateOrderRequest {
            amount: request.amount,
            currency: &request.currency,
            receipt: &request.attempt_id,
            notes: OrderNotes {
                booking_id: &request.booking_id,
                user_id: &request.user_id,
            },
        };

        let url = format!("{}/orders", self.config.api_base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(status = %status, "Razorpay create order response");

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<RazorpayErrorBody>(&text) {
                Ok(body) => (body.error.code, body.error.description),
                Err(_) => (status.as_u16().to_string(), text),
            };
            tracing::error!(code = %code, description = %message, "Razorpay order creation failed");
            return Err(GatewayError::Api {
                provider: PaymentProvider::Razorpay,
                code,
                message,
            });
        }

        let order: RazorpayOrder =
            serde_json::from_str(&text).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            status = ?order.status,
            booking_id = %request.booking_id,
            "Razorpay order created"
        );

        Ok(ChargeReference {
            provider: PaymentProvider::Razorpay,
            provider_id: order.id,
            client_secret: None,
            public_key: self.config.key_id.clone(),
            amount: order.amount,
            currency: order.currency,
        })
    }

    fn verify_event(&self, raw_body: &[u8], signature: &str) -> Result<PaymentEvent, GatewayError> {
        let valid = verify_hmac_sha256_hex(
            self.config.webhook_secret.expose_secret(),
            raw_body,
            signature,
        )
        .map_err(|e| GatewayError::Crypto(e.to_string()))?;
        if !valid {
            return Err(GatewayError::InvalidSignature);
        }
        Self::parse_event(raw_body)
    }

    fn verify_checkout(
        &self,
        confirmation: &CheckoutConfirmation,
    ) -> Result<PaymentEvent, GatewayError> {
        let payload = format!("{}|{}", confirmation.order_id, confirmation.payment_id);
        let valid = verify_hmac_sha256_hex(
            self.config.key_secret.expose_secret(),
            payload.as_bytes(),
            &confirmation.signature,
        )
        .map_err(|e| GatewayError::Crypto(e.to_string()))?;
        if !valid {
            return Err(GatewayError::InvalidSignature);
        }

        tracing::info!(
            order_id = %confirmation.order_id,
            payment_id = %confirmation.payment_id,
            "Razorpay checkout signature verified"
        );
        Ok(PaymentEvent {
            provider: PaymentProvider::Razorpay,
            event_type: "checkout.verified".to_string(),
            reference: Some(confirmation.order_id.clone()),
            kind: PaymentEventKind::Succeeded {
                provider_payment_id: confirmation.payment_id.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use serde_json::json;
    use service_core::utils::signature::hmac_sha256_hex;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_123".to_string(),
            key_secret: Secret::new("key_secret".to_string()),
            webhook_secret: Secret::new("webhook_secret".to_string()),
            api_base_url: base_url.to_string(),
        }
    }

    fn charge() -> ChargeRequest {
        ChargeRequest {
            attempt_id: "txn-1".to_string(),
            booking_id: "booking-1".to_string(),
            user_id: "renter-1".to_string(),
            amount: 30000,
            currency: "INR".to_string(),
        }
    }

    #[test]
    fn unconfigured_without_credentials() {
        let mut cfg = config("http://localhost");
        assert!(RazorpayGateway::new(cfg.clone()).is_configured());
        cfg.key_secret = Secret::new(String::new());
        assert!(!RazorpayGateway::new(cfg).is_configured());
    }

    #[tokio::test]
    async fn creates_order_with_attempt_as_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header_exists("authorization"))
            .and(body_string_contains("\"receipt\":\"txn-1\""))
            .and(body_string_contains("\"booking_id\":\"booking-1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_abc",
                "entity": "order",
                "amount": 30000,
                "currency": "INR",
                "receipt": "txn-1",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = RazorpayGateway::new(config(&server.uri()));
        let reference = gateway.create_charge(&charge()).await.unwrap();

        assert_eq!(reference.provider_id, "order_abc");
        assert_eq!(reference.public_key, "rzp_test_123");
        assert_eq!(reference.amount, 30000);
        assert!(reference.client_secret.is_none());
    }

    #[tokio::test]
    async fn surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": "BAD_REQUEST_ERROR", "description": "amount too small" }
            })))
            .mount(&server)
            .await;

        let gateway = RazorpayGateway::new(config(&server.uri()));
        let err = gateway.create_charge(&charge()).await.unwrap_err();
        match err {
            GatewayError::Api { code, message, .. } => {
                assert_eq!(code, "BAD_REQUEST_ERROR");
                assert_eq!(message, "amount too small");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refuses_to_charge_when_unconfigured() {
        let mut cfg = config("http://localhost");
        cfg.key_id = String::new();
        let err = RazorpayGateway::new(cfg).create_charge(&charge()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(PaymentProvider::Razorpay)));
    }

    #[test]
    fn verifies_captured_webhook() {
        let gateway = RazorpayGateway::new(config("http://localhost"));
        let body = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_1", "order_id": "order_abc", "status": "captured"
            }}}
        })
        .to_string();
        let signature = hmac_sha256_hex("webhook_secret", body.as_bytes()).unwrap();

        let event = gateway.verify_event(body.as_bytes(), &signature).unwrap();
        assert_eq!(event.reference.as_deref(), Some("order_abc"));
        assert_eq!(
            event.kind,
            PaymentEventKind::Succeeded {
                provider_payment_id: "pay_1".to_string()
            }
        );
    }

    #[test]
    fn failed_webhook_carries_reason() {
        let gateway = RazorpayGateway::new(config("http://localhost"));
        let body = json!({
            "event": "payment.failed",
            "payload": { "payment": { "entity": {
                "id": "pay_2", "order_id": "order_abc", "error_description": "Card declined"
            }}}
        })
        .to_string();
        let signature = hmac_sha256_hex("webhook_secret", body.as_bytes()).unwrap();

        let event = gateway.verify_event(body.as_bytes(), &signature).unwrap();
        assert_eq!(
            event.kind,
            PaymentEventKind::Failed {
                reason: "Card declined".to_string()
            }
        );
    }

    #[test]
    fn tampered_webhook_is_rejected() {
        let gateway = RazorpayGateway::new(config("http://localhost"));
        let body = r#"{"event":"payment.captured","payload":{}}"#;
        let signature = hmac_sha256_hex("webhook_secret", body.as_bytes()).unwrap();
        let tampered = body.replace("captured", "failed");

        let err = gateway.verify_event(tampered.as_bytes(), &signature).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature));
    }

    #[test]
    fn checkout_signature_uses_key_secret() {
        let gateway = RazorpayGateway::new(config("http://localhost"));
        let signature = hmac_sha256_hex("key_secret", b"order_abc|pay_1").unwrap();

        let event = gateway
            .verify_checkout(&CheckoutConfirmation {
                order_id: "order_abc".to_string(),
                payment_id: "pay_1".to_string(),
                signature: signature.clone(),
            })
            .unwrap();
        assert_eq!(event.reference.as_deref(), Some("order_abc"));

        let err = gateway
            .verify_checkout(&CheckoutConfirmation {
                order_id: "order_abc".to_string(),
                payment_id: "pay_other".to_string(),
                signature,
            })
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature));
    }
}
