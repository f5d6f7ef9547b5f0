//! Risk limits, model portfolios, and the pluggable allocation policy.

use std::collections::BTreeMap;

use council_models::{
    normalize_allocation, validate_allocation, Portfolio, RiskIssue, RiskTolerance,
    ALLOCATION_TOLERANCE, CASH_SYMBOL,
};
use rust_decimal::Decimal;

/// Diversified core funds every model portfolio is built from.
pub const CORE_SYMBOLS: [&str; 3] = ["VTI", "VXUS", "BND"];

pub fn is_core(symbol: &str) -> bool {
    CORE_SYMBOLS.contains(&symbol)
}

/// Per-tolerance limits, all in percent of total value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskLimits {
    /// Any single non-core security.
    pub max_single_position: Decimal,
    /// Any single core fund.
    pub max_core_fund: Decimal,
    pub cash_floor: Decimal,
    pub cash_ceiling: Decimal,
}

impl RiskLimits {
    pub fn for_tolerance(tolerance: RiskTolerance) -> Self {
        let (single, core, floor, ceiling) = match tolerance {
            RiskTolerance::Conservative => (15, 55, 5, 30),
            RiskTolerance::Moderate => (25, 50, 2, 20),
            RiskTolerance::Aggressive => (40, 70, 0, 10),
        };
        Self {
            max_single_position: Decimal::from(single),
            max_core_fund: Decimal::from(core),
            cash_floor: Decimal::from(floor),
            cash_ceiling: Decimal::from(ceiling),
        }
    }

    /// Every limit the allocation breaks. Empty means acceptable.
    ///
    /// Comparisons allow [`ALLOCATION_TOLERANCE`] of slack so a revision that
    /// lands exactly on a limit after rounding is not flagged again.
    pub fn evaluate(&self, allocation: &BTreeMap<String, Decimal>) -> Vec<RiskIssue> {
        if let Err(e) = validate_allocation(allocation) {
            return vec![RiskIssue::InvalidAllocation {
                reason: e.to_string(),
            }];
        }

        let mut issues = Vec::new();
        for (symbol, weight) in allocation {
            if symbol == CASH_SYMBOL {
                continue;
            }
            if is_core(symbol) {
                if *weight > self.max_core_fund + ALLOCATION_TOLERANCE {
                    issues.push(RiskIssue::CoreOverweight {
                        symbol: symbol.clone(),
                        weight: *weight,
                        limit: self.max_core_fund,
                    });
                }
            } else if *weight > self.max_single_position + ALLOCATION_TOLERANCE {
                issues.push(RiskIssue::Concentration {
                    symbol: symbol.clone(),
                    weight: *weight,
                    limit: self.max_single_position,
                });
            }
        }

        let cash = allocation.get(CASH_SYMBOL).copied().unwrap_or(Decimal::ZERO);
        if cash < self.cash_floor - ALLOCATION_TOLERANCE {
            issues.push(RiskIssue::CashBelowFloor {
                weight: cash,
                floor: self.cash_floor,
            });
        }
        if cash > self.cash_ceiling + ALLOCATION_TOLERANCE {
            issues.push(RiskIssue::CashAboveCeiling {
                weight: cash,
                ceiling: self.cash_ceiling,
            });
        }
        issues
    }
}

/// Target core allocation for a tolerance. Sums to 100.
pub fn model_portfolio(tolerance: RiskTolerance) -> BTreeMap<String, Decimal> {
    let (vti, vxus, bnd, cash) = match tolerance {
        RiskTolerance::Conservative => (30, 10, 50, 10),
        RiskTolerance::Moderate => (45, 20, 30, 5),
        RiskTolerance::Aggressive => (60, 25, 13, 2),
    };
    BTreeMap::from([
        ("VTI".to_string(), Decimal::from(vti)),
        ("VXUS".to_string(), Decimal::from(vxus)),
        ("BND".to_string(), Decimal::from(bnd)),
        (CASH_SYMBOL.to_string(), Decimal::from(cash)),
    ])
}

/// Produces and repairs target allocations. Swappable for a real optimizer.
pub trait AllocationPolicy: Send + Sync {
    fn draft(&self, portfolio: &Portfolio, tolerance: RiskTolerance) -> BTreeMap<String, Decimal>;

    fn revise(
        &self,
        allocation: &BTreeMap<String, Decimal>,
        issues: &[RiskIssue],
        tolerance: RiskTolerance,
    ) -> BTreeMap<String, Decimal>;
}

/// Rule-based placeholder policy.
///
/// Drafting keeps non-core holdings but trims anything above the
/// single-position limit halfway toward it; whatever is left goes to the
/// tolerance's model portfolio. Revision clamps each flagged weight to its
/// limit and redistributes the difference over the model portfolio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileAllocationPolicy;

impl AllocationPolicy for ProfileAllocationPolicy {
    fn draft(&self, portfolio: &Portfolio, tolerance: RiskTolerance) -> BTreeMap<String, Decimal> {
        let limits = RiskLimits::for_tolerance(tolerance);
        let two = Decimal::from(2);

        let mut target = BTreeMap::new();
        let mut kept = Decimal::ZERO;
        for (symbol, weight) in portfolio.weights() {
            if symbol == CASH_SYMBOL || is_core(&symbol) || weight <= Decimal::ZERO {
                continue;
            }
            let keep = if weight > limits.max_single_position {
                weight - (weight - limits.max_single_position) / two
            } else {
                weight
            };
            kept += keep;
            target.insert(symbol, keep);
        }

        let remaining = (Decimal::ONE_HUNDRED - kept).max(Decimal::ZERO);
        spread(&mut target, remaining, &model_portfolio(tolerance));
        normalize_allocation(&target)
    }

    fn revise(
        &self,
        allocation: &BTreeMap<String, Decimal>,
        issues: &[RiskIssue],
        tolerance: RiskTolerance,
    ) -> BTreeMap<String, Decimal> {
        let model = model_portfolio(tolerance);
        let mut target = allocation.clone();

        for issue in issues {
            match issue {
                RiskIssue::Concentration { symbol, limit, .. } => {
                    let excess = clamp_to(&mut target, symbol, *limit);
                    spread(&mut target, excess, &without(&model, &[symbol]));
                }
                RiskIssue::CoreOverweight { symbol, limit, .. } => {
                    let excess = clamp_to(&mut target, symbol, *limit);
                    spread(&mut target, excess, &without(&model, &[symbol]));
                }
                RiskIssue::CashBelowFloor { floor, .. } => {
                    let cash = weight_of(&target, CASH_SYMBOL);
                    if cash < *floor {
                        let donors: Vec<String> = {
                            let core: Vec<String> = target
                                .keys()
                                .filter(|s| is_core(s))
                                .cloned()
                                .collect();
                            if core.is_empty() {
                                target
                                    .keys()
                                    .filter(|s| s.as_str() != CASH_SYMBOL)
                                    .cloned()
                                    .collect()
                            } else {
                                core
                            }
                        };
                        let taken = take(&mut target, *floor - cash, &donors);
                        *target.entry(CASH_SYMBOL.to_string()).or_default() += taken;
                    }
                }
                RiskIssue::CashAboveCeiling { ceiling, .. } => {
                    let excess = clamp_to(&mut target, CASH_SYMBOL, *ceiling);
                    spread(&mut target, excess, &without(&model, &[CASH_SYMBOL]));
                }
                RiskIssue::InvalidAllocation { .. } => {}
            }
        }

        normalize_allocation(&target)
    }
}

fn weight_of(allocation: &BTreeMap<String, Decimal>, symbol: &str) -> Decimal {
    allocation.get(symbol).copied().unwrap_or(Decimal::ZERO)
}

/// Lower `symbol` to `limit` if above it and return the amount removed.
fn clamp_to(allocation: &mut BTreeMap<String, Decimal>, symbol: &str, limit: Decimal) -> Decimal {
    match allocation.get_mut(symbol) {
        Some(weight) if *weight > limit => {
            let excess = *weight - limit;
            *weight = limit;
            excess
        }
        _ => Decimal::ZERO,
    }
}

fn without(model: &BTreeMap<String, Decimal>, excluded: &[&str]) -> BTreeMap<String, Decimal> {
    model
        .iter()
        .filter(|(symbol, _)| !excluded.contains(&symbol.as_str()))
        .map(|(s, w)| (s.clone(), *w))
        .collect()
}

/// Add `amount` across `weights`' keys in proportion to their weights.
fn spread(
    allocation: &mut BTreeMap<String, Decimal>,
    amount: Decimal,
    weights: &BTreeMap<String, Decimal>,
) {
    let total: Decimal = weights.values().sum();
    if amount <= Decimal::ZERO || total <= Decimal::ZERO {
        return;
    }
    for (symbol, weight) in weights {
        *allocation.entry(symbol.clone()).or_default() += amount * *weight / total;
    }
}

/// Remove up to `amount` from `donors` in proportion to their current
/// weights. Returns what was actually removed.
fn take(allocation: &mut BTreeMap<String, Decimal>, amount: Decimal, donors: &[String]) -> Decimal {
    let available: Decimal = donors.iter().map(|s| weight_of(allocation, s)).sum();
    if amount <= Decimal::ZERO || available <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let amount = amount.min(available);
    for symbol in donors {
        if let Some(weight) = allocation.get_mut(symbol) {
            *weight -= amount * *weight / available;
        }
    }
    amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_models::Holding;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn portfolio(cash: Decimal, holdings: &[(&str, Decimal)]) -> Portfolio {
        Portfolio {
            id: Uuid::new_v4(),
            cash,
            holdings: holdings
                .iter()
                .map(|(symbol, value)| Holding {
                    symbol: symbol.to_string(),
                    quantity: dec!(100),
                    market_value: *value,
                })
                .collect(),
        }
    }

    #[test]
    fn model_portfolios_sum_to_hundred_and_pass_their_own_limits() {
        for tolerance in [
            RiskTolerance::Conservative,
            RiskTolerance::Moderate,
            RiskTolerance::Aggressive,
        ] {
            let model = model_portfolio(tolerance);
            assert_eq!(model.values().sum::<Decimal>(), dec!(100));
            assert!(RiskLimits::for_tolerance(tolerance).evaluate(&model).is_empty());
        }
    }

    #[test]
    fn draft_trims_concentration_halfway() {
        let policy = ProfileAllocationPolicy;
        let draft = policy.draft(
            &portfolio(dec!(24000), &[("AAPL", dec!(76000))]),
            RiskTolerance::Moderate,
        );
        assert_eq!(draft["AAPL"], dec!(50.49));
        assert_eq!(draft["VTI"], dec!(22.28));
        assert_eq!(draft["VXUS"], dec!(9.90));
        assert_eq!(draft["BND"], dec!(14.85));
        assert_eq!(draft[CASH_SYMBOL], dec!(2.48));
        assert!(validate_allocation(&draft).is_ok());
    }

    #[test]
    fn draft_of_all_cash_is_model_portfolio() {
        let policy = ProfileAllocationPolicy;
        let draft = policy.draft(&portfolio(dec!(100000), &[]), RiskTolerance::Moderate);
        assert_eq!(draft, model_portfolio(RiskTolerance::Moderate));
    }

    #[test]
    fn evaluate_flags_each_limit() {
        let limits = RiskLimits::for_tolerance(RiskTolerance::Conservative);
        let allocation = BTreeMap::from([
            ("TSLA".to_string(), dec!(20)),
            ("BND".to_string(), dec!(60)),
            ("VTI".to_string(), dec!(17)),
            (CASH_SYMBOL.to_string(), dec!(3)),
        ]);
        let issues = limits.evaluate(&allocation);
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| matches!(i, RiskIssue::Concentration { symbol, .. } if symbol == "TSLA")));
        assert!(issues.iter().any(|i| matches!(i, RiskIssue::CoreOverweight { symbol, .. } if symbol == "BND")));
        assert!(issues.iter().any(|i| matches!(i, RiskIssue::CashBelowFloor { .. })));
    }

    #[test]
    fn evaluate_tolerates_rounding_at_the_limit() {
        let limits = RiskLimits::for_tolerance(RiskTolerance::Moderate);
        let allocation = BTreeMap::from([
            ("AAPL".to_string(), dec!(25.01)),
            ("VTI".to_string(), dec!(44.99)),
            ("BND".to_string(), dec!(25)),
            (CASH_SYMBOL.to_string(), dec!(5)),
        ]);
        assert!(limits.evaluate(&allocation).is_empty());
    }

    #[test]
    fn evaluate_reports_invalid_allocation() {
        let limits = RiskLimits::for_tolerance(RiskTolerance::Moderate);
        let allocation = BTreeMap::from([("VTI".to_string(), dec!(90))]);
        assert!(matches!(
            limits.evaluate(&allocation).as_slice(),
            [RiskIssue::InvalidAllocation { .. }]
        ));
    }

    #[test]
    fn revise_clamps_concentration_to_limit() {
        let policy = ProfileAllocationPolicy;
        let draft = policy.draft(
            &portfolio(dec!(24000), &[("AAPL", dec!(76000))]),
            RiskTolerance::Moderate,
        );
        let limits = RiskLimits::for_tolerance(RiskTolerance::Moderate);
        let issues = limits.evaluate(&draft);
        assert_eq!(issues.len(), 1);

        let revised = policy.revise(&draft, &issues, RiskTolerance::Moderate);
        assert_eq!(revised["AAPL"], dec!(25));
        assert_eq!(revised["VTI"], dec!(33.75));
        assert_eq!(revised["VXUS"], dec!(15));
        assert_eq!(revised["BND"], dec!(22.5));
        assert_eq!(revised[CASH_SYMBOL], dec!(3.75));
        assert!(limits.evaluate(&revised).is_empty());
    }

    #[test]
    fn revise_conservative_single_stock() {
        let policy = ProfileAllocationPolicy;
        let limits = RiskLimits::for_tolerance(RiskTolerance::Conservative);
        let draft = policy.draft(
            &portfolio(dec!(0), &[("TSLA", dec!(50000))]),
            RiskTolerance::Conservative,
        );
        assert_eq!(draft["TSLA"], dec!(57.5));

        let issues = limits.evaluate(&draft);
        assert_eq!(issues.len(), 2);
        let revised = policy.revise(&draft, &issues, RiskTolerance::Conservative);
        assert_eq!(revised["TSLA"], dec!(15));
        assert!(limits.evaluate(&revised).is_empty());
    }

    #[test]
    fn revise_moves_cash_to_floor_and_ceiling() {
        let policy = ProfileAllocationPolicy;
        let tolerance = RiskTolerance::Moderate;

        let low_cash = BTreeMap::from([
            ("VTI".to_string(), dec!(50)),
            ("BND".to_string(), dec!(50)),
        ]);
        let issues = RiskLimits::for_tolerance(tolerance).evaluate(&low_cash);
        let revised = policy.revise(&low_cash, &issues, tolerance);
        assert_eq!(revised[CASH_SYMBOL], dec!(2));
        assert_eq!(revised["VTI"], dec!(49));

        let high_cash = BTreeMap::from([
            ("VTI".to_string(), dec!(40)),
            (CASH_SYMBOL.to_string(), dec!(60)),
        ]);
        let issues = RiskLimits::for_tolerance(tolerance).evaluate(&high_cash);
        let revised = policy.revise(&high_cash, &issues, tolerance);
        assert_eq!(revised[CASH_SYMBOL], dec!(20));
        assert!(validate_allocation(&revised).is_ok());
    }
}
