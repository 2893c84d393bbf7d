pub mod booking;
pub mod clock;
pub mod database;
pub mod error;
pub mod gateways;
pub mod metrics;
pub mod notifier;
pub mod overlap;
pub mod payments;
pub mod realtime;
pub mod reconciliation;
pub mod store;
pub mod sweeper;
pub mod vehicles;

pub use booking::{BookingService, BookingView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::MongoDb;
pub use error::{BookingError, StoreError};
pub use metrics::{get_metrics, init_metrics};
pub use payments::{InitiatedCharge, PaymentService};
pub use reconciliation::{ReconcileOutcome, ReconciliationEngine};
pub use sweeper::{CompletionReport, CompletionScope, ExpirySweeper};
