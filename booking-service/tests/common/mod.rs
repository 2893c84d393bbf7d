#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use booking_service::config::{RazorpayConfig, StripeConfig};
use booking_service::middleware::{USER_ID_HEADER, USER_ROLE_HEADER};
use booking_service::models::{Booking, Vehicle};
use booking_service::services::gateways::{
    GatewayRegistry, RazorpayGateway, StripeGateway, RAZORPAY_SIGNATURE_HEADER,
    STRIPE_SIGNATURE_HEADER,
};
use booking_service::services::notifier::RecordingNotifier;
use booking_service::services::realtime::RecordingRealtime;
use booking_service::services::store::InMemoryLedgerStore;
use booking_service::services::vehicles::InMemoryVehicleDirectory;
use booking_service::services::{Clock, ManualClock};
use booking_service::startup::{router, AppState, Dependencies};
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::utils::signature::hmac_sha256_hex;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const RENTER: &str = "renter-1";
pub const OTHER_RENTER: &str = "renter-2";
pub const VENDOR: &str = "vendor-1";
pub const ADMIN: &str = "admin-1";
pub const VEHICLE: &str = "vehicle-1";
pub const PRICE_PER_HOUR: i64 = 1_500;

pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test";
pub const RAZORPAY_WEBHOOK_SECRET: &str = "rzp_webhook_secret";
pub const RAZORPAY_KEY_SECRET: &str = "rzp_key_secret";

/// 2026-06-01T08:00:00Z
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryLedgerStore>,
    pub vehicles: Arc<InMemoryVehicleDirectory>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub realtime: Arc<RecordingRealtime>,
    pub stripe_server: MockServer,
    pub razorpay_server: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let stripe_server = MockServer::start().await;
        let razorpay_server = MockServer::start().await;

        let store = Arc::new(InMemoryLedgerStore::new());
        let vehicles = Arc::new(InMemoryVehicleDirectory::new());
        let clock = Arc::new(ManualClock::new(now()));
        let notifier = Arc::new(RecordingNotifier::new());
        let realtime = Arc::new(RecordingRealtime::new());

        let stripe = StripeGateway::new(
            StripeConfig {
                secret_key: Secret::new("sk_test_123".to_string()),
                publishable_key: "pk_test_123".to_string(),
                webhook_secret: Secret::new(STRIPE_WEBHOOK_SECRET.to_string()),
                api_base_url: stripe_server.uri(),
                webhook_tolerance_secs: 300,
            },
            clock.clone(),
        );
        let razorpay = RazorpayGateway::new(RazorpayConfig {
            key_id: "rzp_test_123".to_string(),
            key_secret: Secret::new(RAZORPAY_KEY_SECRET.to_string()),
            webhook_secret: Secret::new(RAZORPAY_WEBHOOK_SECRET.to_string()),
            api_base_url: razorpay_server.uri(),
        });

        let state = AppState::from_dependencies(Dependencies {
            store: store.clone(),
            vehicles: vehicles.clone(),
            clock: clock.clone(),
            notifier: notifier.clone(),
            realtime: realtime.clone(),
            gateways: GatewayRegistry::new(Arc::new(stripe), Arc::new(razorpay)),
            currency: "INR".to_string(),
            stale_after: Duration::minutes(60),
            reminder_lead: Duration::minutes(60),
        });

        vehicles.insert(Vehicle {
            id: VEHICLE.to_string(),
            owner_id: VENDOR.to_string(),
            price_per_hour: PRICE_PER_HOUR,
            available: true,
        });

        Self {
            router: router(state.clone()),
            state,
            store,
            vehicles,
            clock,
            notifier,
            realtime,
            stripe_server,
            razorpay_server,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, user_id: &str, role: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(USER_ID_HEADER, user_id)
            .header(USER_ROLE_HEADER, role)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, user_id: &str, role: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(USER_ID_HEADER, user_id)
            .header(USER_ROLE_HEADER, role)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Book `VEHICLE` as `RENTER` for `hours`, starting `offset_hours` from now.
    pub async fn create_booking(&self, offset_hours: i64, hours: i64) -> (StatusCode, Value) {
        let start = self.clock.now() + Duration::hours(offset_hours);
        self.create_booking_between(start, start + Duration::hours(hours))
            .await
    }

    pub async fn create_booking_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (StatusCode, Value) {
        self.post(
            "/bookings",
            RENTER,
            "renter",
            json!({ "vehicle_id": VEHICLE, "start": start, "end": end }),
        )
        .await
    }

    /// Answer the next PaymentIntent creation with `intent_id`.
    pub async fn mount_stripe_intent(&self, intent_id: &str, amount: i64) {
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": intent_id,
                "client_secret": format!("{}_secret", intent_id),
                "amount": amount,
                "currency": "inr",
                "status": "requires_payment_method"
            })))
            .up_to_n_times(1)
            .mount(&self.stripe_server)
            .await;
    }

    /// Answer the next Razorpay order creation with `order_id`.
    pub async fn mount_razorpay_order(&self, order_id: &str, amount: i64) {
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": order_id,
                "entity": "order",
                "amount": amount,
                "currency": "INR",
                "status": "created"
            })))
            .up_to_n_times(1)
            .mount(&self.razorpay_server)
            .await;
    }

    pub async fn charge(&self, booking_id: &str, provider: &str) -> (StatusCode, Value) {
        self.post(
            &format!("/bookings/{}/charges", booking_id),
            RENTER,
            "renter",
            json!({ "provider": provider }),
        )
        .await
    }

    /// A webhook request carrying a valid `Stripe-Signature` for `body`.
    pub fn stripe_webhook(&self, body: &Value) -> Request<Body> {
        let raw = body.to_string();
        let timestamp = self.clock.now().timestamp();
        let digest = hmac_sha256_hex(
            STRIPE_WEBHOOK_SECRET,
            format!("{}.{}", timestamp, raw).as_bytes(),
        )
        .unwrap();
        webhook_request(
            "/webhooks/stripe",
            STRIPE_SIGNATURE_HEADER,
            &format!("t={},v1={}", timestamp, digest),
            raw,
        )
    }

    /// A webhook request carrying a valid `X-Razorpay-Signature` for `body`.
    pub fn razorpay_webhook(&self, body: &Value) -> Request<Body> {
        let raw = body.to_string();
        let digest = hmac_sha256_hex(RAZORPAY_WEBHOOK_SECRET, raw.as_bytes()).unwrap();
        webhook_request("/webhooks/razorpay", RAZORPAY_SIGNATURE_HEADER, &digest, raw)
    }

    pub fn booking(&self, id: &str) -> Booking {
        self.store
            .bookings()
            .into_iter()
            .find(|b| b.id == id)
            .expect("booking exists")
    }

    /// Let spawned notification tasks finish.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

pub fn webhook_request(uri: &str, header: &str, signature: &str, raw: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(header, signature)
        .body(Body::from(raw))
        .unwrap()
}

pub fn stripe_succeeded(intent_id: &str, charge_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", charge_id),
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent_id, "latest_charge": charge_id } }
    })
}

pub fn stripe_failed(intent_id: &str, message: &str) -> Value {
    json!({
        "id": format!("evt_fail_{}", intent_id),
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": intent_id,
            "last_payment_error": { "message": message }
        } }
    })
}

pub fn razorpay_captured(order_id: &str, payment_id: &str) -> Value {
    json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": payment_id,
            "order_id": order_id,
            "status": "captured"
        } } }
    })
}
