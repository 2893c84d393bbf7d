use booking_service::models::{Booking, BookingStatus, PaymentRecord};
use booking_service::services::overlap::{find_conflict, windows_conflict};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn window() -> impl Strategy<Value = (i64, i64)> {
    (0i64..500, 1i64..200).prop_map(|(start, len)| (start, start + len))
}

fn booking(id: usize, (start, end): (i64, i64), status: BookingStatus) -> Booking {
    let at = |minutes: i64| base() + Duration::minutes(minutes);
    Booking {
        id: format!("b-{}", id),
        vehicle_id: "v-1".to_string(),
        renter_id: "r-1".to_string(),
        vendor_id: "o-1".to_string(),
        start: at(start),
        end: at(end),
        price_per_hour: 100,
        total_amount: 100,
        currency: "INR".to_string(),
        status,
        payment: PaymentRecord::unpaid(),
        reminder_sent: false,
        cancellation_reason: None,
        created_at: base(),
        updated_at: base(),
    }
}

fn status() -> impl Strategy<Value = BookingStatus> {
    prop_oneof![
        Just(BookingStatus::Pending),
        Just(BookingStatus::Approved),
        Just(BookingStatus::Rejected),
        Just(BookingStatus::Cancelled),
        Just(BookingStatus::Completed),
    ]
}

proptest! {
    #[test]
    fn conflict_is_symmetric(a in window(), b in window()) {
        let at = |minutes: i64| base() + Duration::minutes(minutes);
        prop_assert_eq!(
            windows_conflict(at(a.0), at(a.1), at(b.0), at(b.1)),
            windows_conflict(at(b.0), at(b.1), at(a.0), at(a.1))
        );
    }

    #[test]
    fn conflict_matches_minute_sampling(a in window(), b in window()) {
        let at = |minutes: i64| base() + Duration::minutes(minutes);
        let shares_instant = (a.0..=a.1).any(|m| m >= b.0 && m <= b.1);
        prop_assert_eq!(windows_conflict(at(a.0), at(a.1), at(b.0), at(b.1)), shares_instant);
    }

    #[test]
    fn accepted_bookings_never_overlap(
        requests in prop::collection::vec((window(), status()), 1..30)
    ) {
        let mut accepted: Vec<Booking> = Vec::new();
        for (i, (w, s)) in requests.into_iter().enumerate() {
            let candidate = booking(i, w, s);
            if find_conflict(&accepted, "v-1", candidate.start, candidate.end).is_none() {
                accepted.push(candidate);
            }
        }

        let holding: Vec<&Booking> = accepted.iter().filter(|b| b.status.holds_slot()).collect();
        for (i, x) in holding.iter().enumerate() {
            for y in holding.iter().skip(i + 1) {
                prop_assert!(!windows_conflict(x.start, x.end, y.start, y.end));
            }
        }
    }
}
