use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::portfolio::{RiskTolerance, CASH_SYMBOL};

/// Allowed distance of an allocation's sum from 100.
pub const ALLOCATION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Reference price the quantity was sized against.
    pub reference_price: Decimal,
    pub rationale: String,
}

impl RecommendedTrade {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }
}

/// A proposed target allocation plus the trades that would realize it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    pub id: Uuid,
    /// Symbol to percent of total portfolio value; sums to 100.
    pub target_allocation: BTreeMap<String, Decimal>,
    pub recommended_trades: Vec<RecommendedTrade>,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    pub risk_assessment: String,
    /// Tolerance the allocation was drafted for.
    pub risk_tolerance: RiskTolerance,
    /// 0 for the first draft, incremented on every revision.
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

impl Strategy {
    pub fn weight(&self, symbol: &str) -> Decimal {
        self.target_allocation
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn cash_weight(&self) -> Decimal {
        self.weight(CASH_SYMBOL)
    }

    /// Largest non-cash position, ties broken by symbol order.
    pub fn largest_position(&self) -> Option<(&str, Decimal)> {
        self.target_allocation
            .iter()
            .filter(|(symbol, _)| symbol.as_str() != CASH_SYMBOL)
            .fold(None, |best, (symbol, weight)| match best {
                Some((_, w)) if w >= *weight => best,
                _ => Some((symbol.as_str(), *weight)),
            })
    }
}

/// Check that every weight is non-negative and the total is 100 within tolerance.
pub fn validate_allocation(allocation: &BTreeMap<String, Decimal>) -> Result<(), ModelError> {
    if allocation.is_empty() {
        return Err(ModelError::InvalidAllocation("allocation is empty".to_string()));
    }
    if let Some((symbol, weight)) = allocation.iter().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(ModelError::InvalidAllocation(format!(
            "{symbol} has negative weight {weight}"
        )));
    }
    let total: Decimal = allocation.values().sum();
    if (total - Decimal::ONE_HUNDRED).abs() > ALLOCATION_TOLERANCE {
        return Err(ModelError::InvalidAllocation(format!(
            "weights sum to {total}, expected 100"
        )));
    }
    Ok(())
}

/// Rescale weights to sum to exactly 100 at two decimal places.
///
/// Negative weights are clamped to zero and zero entries are dropped. The
/// rounding residual is pushed onto the largest entry so the result always
/// passes [`validate_allocation`]. An allocation with no positive weight
/// becomes all cash.
pub fn normalize_allocation(allocation: &BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    let positive: BTreeMap<String, Decimal> = allocation
        .iter()
        .filter(|(_, w)| **w > Decimal::ZERO)
        .map(|(s, w)| (s.clone(), *w))
        .collect();

    let total: Decimal = positive.values().sum();
    if total <= Decimal::ZERO {
        return BTreeMap::from([(CASH_SYMBOL.to_string(), Decimal::ONE_HUNDRED)]);
    }

    let mut scaled: BTreeMap<String, Decimal> = positive
        .into_iter()
        .map(|(s, w)| (s, (w * Decimal::ONE_HUNDRED / total).round_dp(2)))
        .filter(|(_, w)| *w > Decimal::ZERO)
        .collect();

    let residual = Decimal::ONE_HUNDRED - scaled.values().sum::<Decimal>();
    if !residual.is_zero() {
        let largest = scaled
            .iter()
            .fold(None::<(&String, Decimal)>, |best, (s, w)| match best {
                Some((_, bw)) if bw >= *w => best,
                _ => Some((s, *w)),
            })
            .map(|(s, _)| s.clone());
        if let Some(symbol) = largest {
            if let Some(weight) = scaled.get_mut(&symbol) {
                *weight += residual;
            }
        }
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn alloc(entries: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
        entries
            .iter()
            .map(|(s, w)| (s.to_string(), *w))
            .collect()
    }

    #[test]
    fn tolerance_constant() {
        assert_eq!(ALLOCATION_TOLERANCE, dec!(0.01));
    }

    #[test]
    fn validate_accepts_exact_and_near_hundred() {
        assert!(validate_allocation(&alloc(&[("VTI", dec!(60)), ("BND", dec!(40))])).is_ok());
        assert!(validate_allocation(&alloc(&[("VTI", dec!(60.005)), ("BND", dec!(40))])).is_ok());
    }

    #[test]
    fn validate_rejects_bad_sum_and_negatives() {
        assert!(validate_allocation(&alloc(&[("VTI", dec!(60)), ("BND", dec!(30))])).is_err());
        assert!(
            validate_allocation(&alloc(&[("VTI", dec!(110)), ("BND", dec!(-10))])).is_err()
        );
        assert!(validate_allocation(&BTreeMap::new()).is_err());
    }

    #[test]
    fn normalize_pushes_residual_to_largest() {
        let normalized = normalize_allocation(&alloc(&[
            ("A", dec!(1)),
            ("B", dec!(1)),
            ("C", dec!(1)),
        ]));
        assert_eq!(normalized.values().sum::<Decimal>(), dec!(100));
        assert!(validate_allocation(&normalized).is_ok());
    }

    #[test]
    fn normalize_drops_negative_and_zero() {
        let normalized = normalize_allocation(&alloc(&[
            ("A", dec!(50)),
            ("B", dec!(-5)),
            ("C", dec!(0)),
        ]));
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized["A"], dec!(100));
    }

    #[test]
    fn normalize_empty_becomes_cash() {
        let normalized = normalize_allocation(&BTreeMap::new());
        assert_eq!(normalized[CASH_SYMBOL], dec!(100));
    }

    #[test]
    fn largest_position_skips_cash() {
        let strategy = Strategy {
            id: Uuid::new_v4(),
            target_allocation: alloc(&[("CASH", dec!(70)), ("VTI", dec!(20)), ("BND", dec!(10))]),
            recommended_trades: vec![],
            confidence: dec!(0.8),
            risk_assessment: String::new(),
            risk_tolerance: RiskTolerance::Moderate,
            revision: 0,
            created_at: Utc::now(),
        };
        assert_eq!(strategy.largest_position(), Some(("VTI", dec!(20))));
        assert_eq!(strategy.cash_weight(), dec!(70));
        assert_eq!(strategy.weight("MSFT"), Decimal::ZERO);
    }

    #[test]
    fn trade_side_serialization() {
        assert_eq!(serde_json::to_string(&TradeSide::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&OrderType::Limit).unwrap(), "\"limit\"");
    }
}
