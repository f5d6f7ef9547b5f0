use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::TradeSide;

/// Terminal or resting state of a submitted order as reported by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Accepted,
    Rejected,
    Canceled,
    /// The submission failed in transit; the order may or may not exist at
    /// the broker and must be reconciled by hand.
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "filled",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Unknown => "unknown",
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Outcome of one order leg. Callers reconcile these individually: a failed
/// session can still contain filled legs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub session_id: Uuid,
    pub order_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub filled_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}
