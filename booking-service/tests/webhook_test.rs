mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use booking_service::models::TransactionStatus;
use booking_service::services::gateways::{RAZORPAY_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER};
use chrono::Duration;
use common::{
    razorpay_captured, stripe_succeeded, webhook_request, TestApp, PRICE_PER_HOUR,
    STRIPE_WEBHOOK_SECRET,
};
use service_core::utils::signature::hmac_sha256_hex;

async fn pending_stripe_attempt(app: &TestApp) -> String {
    let (_, booking) = app.create_booking(24, 2).await;
    let booking_id = booking["id"].as_str().unwrap().to_string();
    app.mount_stripe_intent("pi_1", 2 * PRICE_PER_HOUR).await;
    let (status, _) = app.charge(&booking_id, "stripe").await;
    assert_eq!(status, StatusCode::CREATED);
    booking_id
}

fn assert_untouched(app: &TestApp, booking_id: &str) {
    assert!(!app.booking(booking_id).is_paid());
    assert_eq!(app.store.transactions()[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn tampered_stripe_body_is_rejected_without_changes() {
    let app = TestApp::spawn().await;
    let booking_id = pending_stripe_attempt(&app).await;

    let signed = app.stripe_webhook(&stripe_succeeded("pi_other", "ch_1"));
    let signature = signed
        .headers()
        .get(STRIPE_SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    // Same signature, different body
    let tampered = webhook_request(
        "/webhooks/stripe",
        STRIPE_SIGNATURE_HEADER,
        &signature,
        stripe_succeeded("pi_1", "ch_1").to_string(),
    );

    let (status, _) = app.send(tampered).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_untouched(&app, &booking_id);
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let app = TestApp::spawn().await;
    let booking_id = pending_stripe_attempt(&app).await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json")
        .body(Body::from(stripe_succeeded("pi_1", "ch_1").to_string()))
        .unwrap();
    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_untouched(&app, &booking_id);
}

#[tokio::test]
async fn stripe_signature_outside_tolerance_is_rejected() {
    let app = TestApp::spawn().await;
    let booking_id = pending_stripe_attempt(&app).await;

    let raw = stripe_succeeded("pi_1", "ch_1").to_string();
    let old = (common::now() - Duration::minutes(10)).timestamp();
    let digest =
        hmac_sha256_hex(STRIPE_WEBHOOK_SECRET, format!("{}.{}", old, raw).as_bytes()).unwrap();
    let request = webhook_request(
        "/webhooks/stripe",
        STRIPE_SIGNATURE_HEADER,
        &format!("t={},v1={}", old, digest),
        raw,
    );

    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_untouched(&app, &booking_id);
}

#[tokio::test]
async fn stripe_signature_for_other_secret_is_rejected() {
    let app = TestApp::spawn().await;
    let booking_id = pending_stripe_attempt(&app).await;

    let raw = stripe_succeeded("pi_1", "ch_1").to_string();
    let t = common::now().timestamp();
    let digest = hmac_sha256_hex("whsec_wrong", format!("{}.{}", t, raw).as_bytes()).unwrap();
    let request = webhook_request(
        "/webhooks/stripe",
        STRIPE_SIGNATURE_HEADER,
        &format!("t={},v1={}", t, digest),
        raw,
    );

    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_untouched(&app, &booking_id);
}

#[tokio::test]
async fn razorpay_signature_over_other_body_is_rejected() {
    let app = TestApp::spawn().await;
    let (_, booking) = app.create_booking(24, 2).await;
    let booking_id = booking["id"].as_str().unwrap().to_string();
    app.mount_razorpay_order("order_1", 2 * PRICE_PER_HOUR).await;
    app.charge(&booking_id, "razorpay").await;

    let signed = app.razorpay_webhook(&razorpay_captured("order_other", "pay_1"));
    let signature = signed
        .headers()
        .get(RAZORPAY_SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let tampered = webhook_request(
        "/webhooks/razorpay",
        RAZORPAY_SIGNATURE_HEADER,
        &signature,
        razorpay_captured("order_1", "pay_1").to_string(),
    );

    let (status, _) = app.send(tampered).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!app.booking(&booking_id).is_paid());
}

#[tokio::test]
async fn valid_razorpay_webhook_marks_booking_paid() {
    let app = TestApp::spawn().await;
    let (_, booking) = app.create_booking(24, 2).await;
    let booking_id = booking["id"].as_str().unwrap().to_string();
    app.mount_razorpay_order("order_1", 2 * PRICE_PER_HOUR).await;
    app.charge(&booking_id, "razorpay").await;

    let (status, body) = app
        .send(app.razorpay_webhook(&razorpay_captured("order_1", "pay_1")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    assert!(app.booking(&booking_id).is_paid());
}

#[tokio::test]
async fn verified_but_unparseable_body_is_acknowledged() {
    let app = TestApp::spawn().await;
    let raw = "not json".to_string();
    let digest = hmac_sha256_hex(common::RAZORPAY_WEBHOOK_SECRET, raw.as_bytes()).unwrap();

    let (status, body) = app
        .send(webhook_request(
            "/webhooks/razorpay",
            RAZORPAY_SIGNATURE_HEADER,
            &digest,
            raw,
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}
