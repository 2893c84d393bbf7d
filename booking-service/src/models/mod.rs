mod booking;
mod principal;
mod transaction;
mod vehicle;

pub use booking::{
    billable_hours, Booking, BookingStatus, PaymentProvider, PaymentRecord, PaymentStatus,
};
pub use principal::{Principal, Role};
pub use transaction::{Transaction, TransactionStatus, TransactionType, REFUND_REQUIRED_KEY};
pub use vehicle::Vehicle;
