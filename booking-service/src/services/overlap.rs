//! Overlap checking for vehicle time windows.
//!
//! Two windows conflict when `existing.start <= new.end && existing.end >= new.start`.
//! The predicate is closed on both ends, so windows that merely touch (one ends
//! at 13:00, the next starts at 13:00) also conflict. Only bookings whose status
//! holds the slot (`pending`, `approved`) are considered.

use chrono::{DateTime, Utc};

use crate::models::Booking;

/// Closed-interval intersection test.
///
/// Covers a new window starting inside, ending inside, containing, or being
/// contained by the existing one.
pub fn windows_conflict(
    existing_start: DateTime<Utc>,
    existing_end: DateTime<Utc>,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
) -> bool {
    existing_start <= new_end && existing_end >= new_start
}

/// Return the first booking for `vehicle_id` that would conflict with the
/// proposed window, if any.
pub fn find_conflict<'a, I>(
    existing: I,
    vehicle_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    existing.into_iter().find(|b| {
        b.vehicle_id == vehicle_id
            && b.status.holds_slot()
            && windows_conflict(b.start, b.end, start, end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, PaymentRecord};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
    }

    fn booking(vehicle: &str, start: u32, end: u32, status: BookingStatus) -> Booking {
        Booking {
            id: format!("{}-{}-{}", vehicle, start, end),
            vehicle_id: vehicle.to_string(),
            renter_id: "renter".to_string(),
            vendor_id: "vendor".to_string(),
            start: at(start),
            end: at(end),
            price_per_hour: 100,
            total_amount: 100 * i64::from(end - start),
            currency: "INR".to_string(),
            status,
            payment: PaymentRecord::unpaid(),
            reminder_sent: false,
            cancellation_reason: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn detects_start_inside_end_inside_and_containment() {
        // existing 10-13
        assert!(windows_conflict(at(10), at(13), at(12), at(14)));
        assert!(windows_conflict(at(10), at(13), at(8), at(11)));
        assert!(windows_conflict(at(10), at(13), at(9), at(14)));
        assert!(windows_conflict(at(10), at(13), at(11), at(12)));
    }

    #[test]
    fn touching_windows_conflict_and_disjoint_ones_do_not() {
        assert!(windows_conflict(at(10), at(13), at(13), at(15)));
        assert!(windows_conflict(at(10), at(13), at(8), at(10)));
        assert!(!windows_conflict(at(10), at(13), at(14), at(16)));
        assert!(!windows_conflict(at(10), at(13), at(6), at(9)));
    }

    #[test]
    fn ignores_other_vehicles_and_released_bookings() {
        let existing = vec![
            booking("car-2", 10, 13, BookingStatus::Approved),
            booking("car-1", 10, 13, BookingStatus::Cancelled),
            booking("car-1", 10, 13, BookingStatus::Completed),
            booking("car-1", 10, 13, BookingStatus::Rejected),
        ];
        assert!(find_conflict(&existing, "car-1", at(11), at(12)).is_none());
    }

    #[test]
    fn pending_bookings_hold_the_slot() {
        let existing = vec![booking("car-1", 10, 13, BookingStatus::Pending)];
        let conflict = find_conflict(&existing, "car-1", at(12), at(14)).unwrap();
        assert_eq!(conflict.id, "car-1-10-13");
    }
}
