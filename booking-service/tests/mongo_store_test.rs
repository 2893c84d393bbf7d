//! Runs against a real MongoDB replica set (transactions need one).
//! `TEST_MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0 cargo test -- --ignored`

use booking_service::models::{
    Booking, BookingStatus, PaymentProvider, PaymentRecord, Transaction, TransactionStatus,
    TransactionType,
};
use booking_service::services::store::{
    InsertOutcome, LedgerStore, MongoLedgerStore, PaymentSuccess, SuccessOutcome,
};
use booking_service::services::MongoDb;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

async fn store() -> (MongoLedgerStore, MongoDb) {
    let uri = std::env::var("TEST_MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
    let db_name = format!("booking_test_{}", uuid::Uuid::new_v4().simple());
    let db = MongoDb::connect(&uri, &db_name).await.unwrap();
    db.initialize_indexes().await.unwrap();
    (MongoLedgerStore::new(db.clone()), db)
}

fn booking(id: &str, offset_hours: i64, hours: i64) -> Booking {
    let start = now() + Duration::hours(offset_hours);
    Booking {
        id: id.to_string(),
        vehicle_id: "vehicle-1".to_string(),
        renter_id: "renter-1".to_string(),
        vendor_id: "vendor-1".to_string(),
        start,
        end: start + Duration::hours(hours),
        price_per_hour: 1_500,
        total_amount: hours * 1_500,
        currency: "INR".to_string(),
        status: BookingStatus::Approved,
        payment: PaymentRecord::unpaid(),
        reminder_sent: false,
        cancellation_reason: None,
        created_at: now(),
        updated_at: now(),
    }
}

fn attempt(id: &str, booking_id: &str, provider_id: &str) -> Transaction {
    Transaction {
        id: id.to_string(),
        booking_id: booking_id.to_string(),
        user_id: "renter-1".to_string(),
        amount: 3_000,
        currency: "INR".to_string(),
        kind: TransactionType::Charge,
        provider: PaymentProvider::Stripe,
        provider_id: provider_id.to_string(),
        status: TransactionStatus::Pending,
        metadata: BTreeMap::new(),
        error: None,
        created_at: now(),
        updated_at: now(),
    }
}

#[tokio::test]
#[ignore = "requires a MongoDB replica set"]
async fn concurrent_inserts_for_one_window_accept_one() {
    let (store, db) = store().await;
    let store = std::sync::Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert_booking_if_free(booking(&format!("b-{}", i), 24, 2))
                .await
                .unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if let InsertOutcome::Inserted(_) = handle.await.unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);

    db.database().drop(None).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MongoDB replica set"]
async fn success_is_applied_once() {
    let (store, db) = store().await;
    store.insert_booking_if_free(booking("b-1", 24, 2)).await.unwrap();
    store
        .insert_transaction(attempt("t-1", "b-1", "pi_1"))
        .await
        .unwrap();
    let success = PaymentSuccess {
        provider: PaymentProvider::Stripe,
        provider_payment_id: "ch_1".to_string(),
    };

    let first = store.apply_payment_success("t-1", &success, now()).await.unwrap();
    let second = store.apply_payment_success("t-1", &success, now()).await.unwrap();

    assert!(matches!(first, SuccessOutcome::Applied { .. }));
    assert!(matches!(second, SuccessOutcome::AlreadyApplied { .. }));
    assert!(store.find_booking("b-1").await.unwrap().unwrap().is_paid());

    db.database().drop(None).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MongoDB replica set"]
async fn stale_pending_attempts_are_failed() {
    let (store, db) = store().await;
    store
        .insert_transaction(attempt("t-1", "b-1", "pi_1"))
        .await
        .unwrap();

    let later = now() + Duration::minutes(90);
    let moved = store
        .fail_stale_transactions(later - Duration::minutes(60), "expired", later)
        .await
        .unwrap();

    assert_eq!(moved, 1);
    let attempt = store.find_transaction("t-1").await.unwrap().unwrap();
    assert_eq!(attempt.status, TransactionStatus::Failed);

    db.database().drop(None).await.unwrap();
}
