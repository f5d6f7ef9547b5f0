use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use council_models::{
    validate_allocation, AgentRole, Contribution, ContributionContent, DeliberationState,
    MarketOutlook, OrderType, Portfolio, RecommendedTrade, RiskTolerance, Strategy, TradeSide,
    CASH_SYMBOL,
};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::AgentError;
use crate::policy::{AllocationPolicy, ProfileAllocationPolicy};

pub const STRATEGY_AGENT: &str = "strategist";

/// Trades smaller than this many dollars are not worth placing.
const MIN_TRADE_NOTIONAL: Decimal = Decimal::ONE;

const BASE_CONFIDENCE: Decimal = Decimal::from_parts(80, 0, 0, false, 2);
const MIN_CONFIDENCE: Decimal = Decimal::from_parts(40, 0, 0, false, 2);
const MISSING_PRICE_PENALTY: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
const STALE_DATA_PENALTY: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
const REVISION_PENALTY: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Drafts and revises the proposal.
pub struct StrategyAgent {
    policy: Arc<dyn AllocationPolicy>,
}

impl StrategyAgent {
    pub fn new(policy: Arc<dyn AllocationPolicy>) -> Self {
        Self { policy }
    }
}

impl Default for StrategyAgent {
    fn default() -> Self {
        Self::new(Arc::new(ProfileAllocationPolicy))
    }
}

/// Orders that move `portfolio` to `target`.
///
/// Prices come from the outlook, falling back to the price implied by the
/// current holding. Symbols with no price are returned separately and get no
/// trade. Sells are listed before buys.
pub fn derive_trades(
    portfolio: &Portfolio,
    target: &BTreeMap<String, Decimal>,
    outlook: Option<&MarketOutlook>,
) -> (Vec<RecommendedTrade>, Vec<String>) {
    let total = portfolio.total_value();
    if total <= Decimal::ZERO {
        return (Vec::new(), Vec::new());
    }

    let mut current: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();
    for holding in &portfolio.holdings {
        let entry = current
            .entry(holding.symbol.as_str())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += holding.market_value;
        entry.1 += holding.quantity;
    }

    let symbols: BTreeSet<&str> = target
        .keys()
        .map(String::as_str)
        .chain(current.keys().copied())
        .filter(|s| *s != CASH_SYMBOL)
        .collect();

    let mut sells = Vec::new();
    let mut buys = Vec::new();
    let mut missing_prices = Vec::new();

    for symbol in symbols {
        let (current_value, held_quantity) =
            current.get(symbol).copied().unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let target_pct = target.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let delta = target_pct * total / Decimal::ONE_HUNDRED - current_value;
        if delta.abs() < MIN_TRADE_NOTIONAL {
            continue;
        }

        let price = outlook.and_then(|o| o.price_of(symbol)).or_else(|| {
            portfolio
                .holding(symbol)
                .and_then(|h| h.implied_price())
        });
        let Some(price) = price.filter(|p| *p > Decimal::ZERO) else {
            missing_prices.push(symbol.to_string());
            continue;
        };

        let side = if delta > Decimal::ZERO {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };
        let mut quantity =
            (delta.abs() / price).round_dp_with_strategy(4, RoundingStrategy::ToZero);
        if side == TradeSide::Sell {
            quantity = quantity.min(held_quantity);
        }
        if quantity <= Decimal::ZERO {
            continue;
        }

        let trade = RecommendedTrade {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reference_price: price,
            rationale: format!(
                "Move {symbol} to {}% of portfolio value",
                target_pct.round_dp(2)
            ),
        };
        match side {
            TradeSide::Sell => sells.push(trade),
            TradeSide::Buy => buys.push(trade),
        }
    }

    sells.extend(buys);
    (sells, missing_prices)
}

fn confidence(missing_prices: usize, stale_data: bool, revision: u32) -> Decimal {
    let mut score = BASE_CONFIDENCE
        - MISSING_PRICE_PENALTY * Decimal::from(missing_prices)
        - REVISION_PENALTY * Decimal::from(revision);
    if stale_data {
        score -= STALE_DATA_PENALTY;
    }
    score.max(MIN_CONFIDENCE)
}

fn risk_assessment(
    tolerance: RiskTolerance,
    allocation: &BTreeMap<String, Decimal>,
    comments: usize,
) -> String {
    let largest = allocation
        .iter()
        .filter(|(s, _)| s.as_str() != CASH_SYMBOL)
        .max_by(|a, b| a.1.cmp(b.1))
        .map(|(s, w)| format!("largest position {s} at {w}%"))
        .unwrap_or_else(|| "no invested positions".to_string());
    let cash = allocation.get(CASH_SYMBOL).copied().unwrap_or(Decimal::ZERO);
    let mut text = format!(
        "{} profile: {largest}, cash {cash}%.",
        tolerance.as_str()
    );
    if comments > 0 {
        text.push_str(&format!(" {comments} user comment(s) on record."));
    }
    text
}

#[async_trait]
impl Agent for StrategyAgent {
    fn name(&self) -> &str {
        STRATEGY_AGENT
    }

    fn role(&self) -> AgentRole {
        AgentRole::Strategy
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError> {
        let tolerance = state.user_profile.risk_tolerance;

        let (allocation, revision) = match &state.proposal {
            None => (self.policy.draft(&state.portfolio, tolerance), 0),
            Some(previous) if previous.risk_tolerance != tolerance => {
                debug!(
                    from = previous.risk_tolerance.as_str(),
                    to = tolerance.as_str(),
                    "Risk tolerance changed, redrafting"
                );
                (
                    self.policy.draft(&state.portfolio, tolerance),
                    previous.revision + 1,
                )
            }
            Some(previous) => {
                let issues = state
                    .current_critique()
                    .map(|(_, issues)| issues)
                    .unwrap_or_default();
                (
                    self.policy
                        .revise(&previous.target_allocation, issues, tolerance),
                    previous.revision + 1,
                )
            }
        };
        validate_allocation(&allocation)?;

        let outlook = state.latest_outlook();
        let (trades, missing_prices) = derive_trades(&state.portfolio, &allocation, outlook);
        let stale = outlook.map_or(true, |o| !o.stale_symbols.is_empty());

        let strategy = Strategy {
            id: Uuid::new_v4(),
            confidence: confidence(missing_prices.len(), stale, revision),
            risk_assessment: risk_assessment(tolerance, &allocation, state.user_comments.len()),
            target_allocation: allocation,
            recommended_trades: trades,
            risk_tolerance: tolerance,
            revision,
            created_at: Utc::now(),
        };

        debug!(
            revision,
            trades = strategy.recommended_trades.len(),
            confidence = %strategy.confidence,
            "Proposal ready"
        );
        Ok(Contribution::new(
            STRATEGY_AGENT,
            state.round_number(),
            ContributionContent::Proposal { strategy },
        ))
    }
}
