use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Booking lifecycle status.
///
/// Bookings are auto-approved at creation; `Pending` and `Rejected` are kept
/// for records written by the vendor-confirmation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Statuses that reserve the vehicle's time window.
    pub const HOLDING: [BookingStatus; 2] = [BookingStatus::Pending, BookingStatus::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn holds_slot(self) -> bool {
        Self::HOLDING.contains(&self)
    }

    /// Terminal states reached without the rental taking place.
    pub fn is_void(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Razorpay,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Razorpay => "razorpay",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

/// Payment state embedded in a booking. Written only by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// `None` until a payment has been confirmed.
    pub provider: Option<PaymentProvider>,
    pub provider_payment_id: Option<String>,
    pub status: PaymentStatus,
}

impl PaymentRecord {
    pub fn unpaid() -> Self {
        Self {
            provider: None,
            provider_payment_id: None,
            status: PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: String,
    pub vehicle_id: String,
    pub renter_id: String,
    pub vendor_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end: DateTime<Utc>,
    /// Hourly rate captured at creation, in the currency's smallest unit.
    pub price_per_hour: i64,
    /// `billable_hours(start, end) * price_per_hour`, fixed at creation.
    pub total_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment: PaymentRecord,
    #[serde(default)]
    pub reminder_sent: bool,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_paid(&self) -> bool {
        self.payment.status == PaymentStatus::Paid
    }

    /// Paid and approved: the rental is confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Approved && self.is_paid()
    }

    pub fn window_contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Whole hours billed for a window, rounding any partial hour up.
///
/// Returns 0 for empty or inverted windows.
pub fn billable_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - start).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    #[test]
    fn billable_hours_rounds_partial_hours_up() {
        assert_eq!(billable_hours(at(10, 0), at(13, 0)), 3);
        assert_eq!(billable_hours(at(10, 0), at(13, 1)), 4);
        assert_eq!(billable_hours(at(10, 0), at(10, 30)), 1);
        assert_eq!(
            billable_hours(at(10, 0), at(10, 0) + Duration::milliseconds(1)),
            1
        );
    }

    #[test]
    fn billable_hours_is_zero_for_empty_or_inverted_windows() {
        assert_eq!(billable_hours(at(10, 0), at(10, 0)), 0);
        assert_eq!(billable_hours(at(12, 0), at(10, 0)), 0);
    }

    #[test]
    fn holding_statuses() {
        assert!(BookingStatus::Pending.holds_slot());
        assert!(BookingStatus::Approved.holds_slot());
        assert!(!BookingStatus::Cancelled.holds_slot());
        assert!(!BookingStatus::Completed.holds_slot());
        assert!(BookingStatus::Rejected.is_void());
        assert!(!BookingStatus::Completed.is_void());
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentProvider::Razorpay).unwrap(),
            "\"razorpay\""
        );
        assert_eq!(serde_json::to_string(&PaymentStatus::Paid).unwrap(), "\"paid\"");
    }
}
