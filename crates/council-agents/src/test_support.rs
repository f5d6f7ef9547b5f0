//! Scripted collaborators and fixtures for deliberation tests.
//!
//! Every collaborator here is deterministic: the scripted LLM answers from a
//! queue, the scripted broker follows a fixed fill/reject plan, and the
//! scripted market data serves fixed quotes with optional stale or missing
//! symbols. Each records what it was asked so tests can assert on traffic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use council_models::config::{LlmBackend, MarketDataConfig};
use council_models::{
    AgentRole, AnalysisRequest, Contribution, CouncilConfig, DeliberationState, Holding,
    MarketSnapshot, OrderStatus, Portfolio, RiskTolerance, UserProfile,
};
use council_store::{RecordStore, StoreError};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::agent::{Agent, AgentSet};
use crate::agents::standard_agents;
use crate::broker::{BrokerClient, OrderAck, OrderRequest};
use crate::context::AppContext;
use crate::error::{AgentError, BrokerError, LlmError, MarketDataError};
use crate::llm::{CompletionRequest, LlmClient};
use crate::market_data::MarketDataSource;
use crate::orchestrator::Orchestrator;

/// LLM double that answers from a queue of canned replies.
pub struct ScriptedLlm {
    reachable: bool,
    replies: Mutex<VecDeque<String>>,
    last_reply: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    /// Unreachable: health checks and completions both fail.
    pub fn failing() -> Self {
        Self {
            reachable: false,
            replies: Mutex::new(VecDeque::new()),
            last_reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Passes the health check, then fails every completion.
    pub fn flaky() -> Self {
        Self {
            reachable: true,
            ..Self::failing()
        }
    }

    /// Answers with `replies` in order, repeating the last one.
    pub fn replying(replies: Vec<&str>) -> Self {
        Self {
            reachable: true,
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            last_reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Completion calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop_front();
        let mut last = self.last_reply.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(reply) = next {
            *last = Some(reply);
        }
        last.clone()
            .ok_or_else(|| LlmError::Cli("scripted failure".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.reachable {
            Ok(())
        } else {
            Err(LlmError::Unavailable("scripted outage".to_string()))
        }
    }
}

/// Fill plan for [`ScriptedBroker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScript {
    FillAll,
    /// Fill the first `n` orders, reject every later one.
    RejectAfter(usize),
    RejectAll,
    /// Acknowledge every order without filling it.
    LeaveOpen,
    /// Fail the health check.
    Unreachable,
    /// Fill every order, but only after the given delay.
    SlowFill(std::time::Duration),
    /// Accept the health check, then lose every submission: the broker
    /// times out and cannot say whether the order was placed.
    Unresponsive,
}

/// Broker double that records every order it receives.
pub struct ScriptedBroker {
    script: BrokerScript,
    prices: BTreeMap<String, Decimal>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl ScriptedBroker {
    pub fn new(script: BrokerScript) -> Self {
        Self {
            script,
            prices: MarketDataConfig::default().quotes,
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let index = {
            let mut orders = self.orders.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            orders.push(order.clone());
            orders.len() - 1
        };
        let order_id = format!("scripted-{}", index + 1);
        let filled_price = self.prices.get(&order.symbol).copied();

        if let BrokerScript::SlowFill(delay) = self.script {
            tokio::time::sleep(delay).await;
        }

        match self.script {
            BrokerScript::FillAll | BrokerScript::SlowFill(_) => Ok(OrderAck {
                order_id,
                status: OrderStatus::Filled,
                filled_price,
            }),
            BrokerScript::RejectAfter(n) if index < n => Ok(OrderAck {
                order_id,
                status: OrderStatus::Filled,
                filled_price,
            }),
            BrokerScript::LeaveOpen => Ok(OrderAck {
                order_id,
                status: OrderStatus::Accepted,
                filled_price: None,
            }),
            BrokerScript::Unresponsive => Err(BrokerError::Unavailable(format!(
                "scripted timeout submitting {}",
                order.client_order_id
            ))),
            _ => Err(BrokerError::Rejected(format!(
                "scripted rejection of {}",
                order.client_order_id
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        match self.script {
            BrokerScript::Unreachable => Err(BrokerError::Unavailable("scripted outage".to_string())),
            _ => Ok(()),
        }
    }
}

/// Market data double with fixed quotes.
pub struct ScriptedMarketData {
    quotes: BTreeMap<String, Decimal>,
    stale: BTreeSet<String>,
    lookups: AtomicUsize,
}

impl ScriptedMarketData {
    pub fn new(quotes: BTreeMap<String, Decimal>) -> Self {
        Self {
            quotes,
            stale: BTreeSet::new(),
            lookups: AtomicUsize::new(0),
        }
    }

    /// The demo quotes shipped in the default configuration.
    pub fn demo() -> Self {
        Self::new(MarketDataConfig::default().quotes)
    }

    /// Serve `symbol` with a day-old timestamp.
    pub fn with_stale(mut self, symbol: &str) -> Self {
        self.stale.insert(symbol.to_string());
        self
    }

    /// Stop serving `symbol` at all.
    pub fn without(mut self, symbol: &str) -> Self {
        self.quotes.remove(symbol);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarketData {
    async fn get_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, MarketDataError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let timestamp = if self.stale.contains(symbol) {
            Utc::now() - ChronoDuration::days(1)
        } else {
            Utc::now()
        };
        Ok(self.quotes.get(symbol).map(|price| MarketSnapshot {
            symbol: symbol.to_string(),
            price: *price,
            change: Decimal::ZERO,
            volume: 1_000,
            timestamp,
        }))
    }
}

/// Agent that never contributes. Counts how often it was asked.
pub struct FailingAgent {
    name: String,
    role: AgentRole,
    calls: AtomicUsize,
}

impl FailingAgent {
    pub fn new(name: &str, role: AgentRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn contribute(&self, _state: &DeliberationState) -> Result<Contribution, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::Parse("scripted abstention".to_string()))
    }
}

/// Config for tests: offline LLM with templates, in-memory store, short timeouts.
pub fn test_config() -> CouncilConfig {
    let mut config = CouncilConfig::default();
    config.store.sqlite_path = ":memory:".to_string();
    config.llm.backend = LlmBackend::Offline;
    config.llm.demo_mode = true;
    config.deliberation.agent_timeout_seconds = 5;
    config.bus.handler_timeout_seconds = 2;
    config
}

/// A context wired to scripted collaborators, with handles kept for assertions.
pub struct TestHarness {
    pub ctx: AppContext,
    pub llm: Arc<ScriptedLlm>,
    pub broker: Arc<ScriptedBroker>,
    pub market: Arc<ScriptedMarketData>,
    pub store: Arc<RecordStore>,
}

impl TestHarness {
    pub fn new(
        config: CouncilConfig,
        llm: ScriptedLlm,
        broker: BrokerScript,
    ) -> Result<Self, StoreError> {
        Self::with_market(config, llm, broker, ScriptedMarketData::demo())
    }

    pub fn with_market(
        config: CouncilConfig,
        llm: ScriptedLlm,
        broker: BrokerScript,
        market: ScriptedMarketData,
    ) -> Result<Self, StoreError> {
        let llm = Arc::new(llm);
        let broker = Arc::new(ScriptedBroker::new(broker));
        let market = Arc::new(market);
        let store = Arc::new(RecordStore::in_memory()?);
        let ctx = AppContext::new(
            config,
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            Arc::clone(&market) as Arc<dyn MarketDataSource>,
            Some(Arc::clone(&store)),
        );
        Ok(Self {
            ctx,
            llm,
            broker,
            market,
            store,
        })
    }

    /// Offline LLM, filling broker, demo quotes.
    pub fn standard() -> Result<Self, StoreError> {
        Self::new(test_config(), ScriptedLlm::failing(), BrokerScript::FillAll)
    }

    pub fn agents(&self) -> AgentSet {
        standard_agents(&self.ctx)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::from_context(&self.ctx, self.agents())
    }

    pub fn orchestrator_with(&self, agents: AgentSet) -> Orchestrator {
        Orchestrator::from_context(&self.ctx, agents)
    }
}

pub fn profile(tolerance: RiskTolerance) -> UserProfile {
    UserProfile {
        user_id: "user-1".to_string(),
        risk_tolerance: tolerance,
        investment_horizon_years: Some(10),
        require_user_approval: None,
    }
}

pub fn cash_portfolio(cash: Decimal) -> Portfolio {
    Portfolio {
        id: Uuid::new_v4(),
        cash,
        holdings: vec![],
    }
}

/// `total` split between one position at `weight` percent and cash.
pub fn concentrated_portfolio(symbol: &str, price: Decimal, weight: Decimal, total: Decimal) -> Portfolio {
    let market_value = total * weight / Decimal::ONE_HUNDRED;
    Portfolio {
        id: Uuid::new_v4(),
        cash: total - market_value,
        holdings: vec![Holding {
            symbol: symbol.to_string(),
            quantity: (market_value / price).round_dp(4),
            market_value,
        }],
    }
}

pub fn request(portfolio: Portfolio, tolerance: RiskTolerance) -> AnalysisRequest {
    AnalysisRequest {
        portfolio,
        user_profile: profile(tolerance),
    }
}
