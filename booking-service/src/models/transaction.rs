use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::PaymentProvider;

/// Metadata flag set when captured money has to be returned manually.
pub const REFUND_REQUIRED_KEY: &str = "refund_required";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Charge,
    Refund,
    Payout,
    LateFee,
    Deposit,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

/// One monetary event. A charge attempt is one row; retries add rows.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub provider: PaymentProvider,
    /// The gateway's reference for this attempt (intent id / order id).
    pub provider_id: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn refund_required(&self) -> bool {
        self.metadata
            .get(REFUND_REQUIRED_KEY)
            .is_some_and(|v| v == "true")
    }
}
