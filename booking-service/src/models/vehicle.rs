use serde::{Deserialize, Serialize};

/// The slice of a catalog vehicle the booking core reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    /// Smallest currency unit.
    pub price_per_hour: i64,
    pub available: bool,
}
