use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time quote for one symbol. May be served from a cache and be stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    /// Absolute change since previous close.
    pub change: Decimal,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Change since previous close, in percent. Zero when the previous close is unknown.
    pub fn change_percent(&self) -> Decimal {
        let previous = self.price - self.change;
        if previous <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.change * Decimal::ONE_HUNDRED / previous).round_dp(2)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.timestamp > max_age
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketSentiment {
    Bullish,
    Neutral,
    Bearish,
}

impl MarketSentiment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Self::Bullish),
            "neutral" => Some(Self::Neutral),
            "bearish" => Some(Self::Bearish),
            _ => None,
        }
    }
}
