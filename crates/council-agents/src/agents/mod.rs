pub mod executor;
pub mod explainer;
pub mod market;
pub mod risk;
pub mod strategy;

use std::sync::Arc;

pub use executor::{ExecutorAgent, EXECUTOR_AGENT};
pub use explainer::{explain, ExplainerAgent, ExplanationRecord, EXPLAINER_AGENT};
pub use market::{MarketAgent, MARKET_AGENT};
pub use risk::{RiskAgent, RISK_AGENT};
pub use strategy::{derive_trades, StrategyAgent, STRATEGY_AGENT};

use crate::agent::AgentSet;
use crate::context::AppContext;

/// The default council, wired to the collaborators in `ctx`.
pub fn standard_agents(ctx: &AppContext) -> AgentSet {
    AgentSet {
        market: Arc::new(MarketAgent::new(
            Arc::clone(&ctx.market),
            Arc::clone(&ctx.llm),
            ctx.config.llm.clone(),
            &ctx.config.market_data,
        )),
        strategy: Arc::new(StrategyAgent::default()),
        risk: Arc::new(RiskAgent),
        executor: Arc::new(ExecutorAgent::new(
            Arc::clone(&ctx.broker),
            Arc::downgrade(&ctx.bus),
        )),
        explainer: Arc::new(ExplainerAgent::new(
            Arc::clone(&ctx.llm),
            ctx.config.llm.clone(),
            Arc::downgrade(&ctx.bus),
        )),
    }
}
