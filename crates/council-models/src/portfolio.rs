use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved allocation key for uninvested cash.
pub const CASH_SYMBOL: &str = "CASH";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
            RiskTolerance::Aggressive => "aggressive",
        }
    }
}

/// A single position held in the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub symbol: String,
    /// Shares held. Fractional shares are allowed.
    pub quantity: Decimal,
    /// Market value of the position at request time.
    pub market_value: Decimal,
}

impl Holding {
    /// Implied per-share price, if the holding is non-empty.
    pub fn implied_price(&self) -> Option<Decimal> {
        if self.quantity > Decimal::ZERO {
            Some(self.market_value / self.quantity)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub id: Uuid,
    pub cash: Decimal,
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

impl Portfolio {
    pub fn total_value(&self) -> Decimal {
        self.cash
            + self
                .holdings
                .iter()
                .map(|h| h.market_value)
                .sum::<Decimal>()
    }

    /// Current weights in percent, keyed by symbol, with cash under [`CASH_SYMBOL`].
    /// Duplicate symbols are merged. An empty portfolio is reported as all cash.
    pub fn weights(&self) -> BTreeMap<String, Decimal> {
        let total = self.total_value();
        let mut weights = BTreeMap::new();
        if total <= Decimal::ZERO {
            weights.insert(CASH_SYMBOL.to_string(), Decimal::ONE_HUNDRED);
            return weights;
        }

        for holding in &self.holdings {
            *weights
                .entry(holding.symbol.clone())
                .or_insert(Decimal::ZERO) += holding.market_value * Decimal::ONE_HUNDRED / total;
        }
        if self.cash > Decimal::ZERO {
            weights.insert(
                CASH_SYMBOL.to_string(),
                self.cash * Decimal::ONE_HUNDRED / total,
            );
        }
        weights
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub investment_horizon_years: Option<u32>,
    /// Per-user override of `deliberation.require_user_approval`.
    #[serde(default)]
    pub require_user_approval: Option<bool>,
}

/// Body of an analysis run: the `POST /analysis/run` request shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub portfolio: Portfolio,
    pub user_profile: UserProfile,
}
