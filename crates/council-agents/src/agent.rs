use std::sync::{Arc, Weak};

use async_trait::async_trait;
use council_models::{AgentMessage, AgentRole, Contribution, DeliberationState};
use tracing::{info, warn};

use crate::bus::{MessageBus, MessageHandler};
use crate::error::AgentError;
use crate::llm::LlmClient;

/// A deliberation participant. Mockable for testing.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> AgentRole;

    /// Bus topics this agent reacts to outside the deliberation loop.
    fn subscriptions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Probe collaborators. Safe to call more than once.
    async fn initialize(&self) -> Result<(), AgentError>;

    /// Produce this agent's output for the current round. Must not depend on
    /// anything but `state` and the agent's collaborators.
    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError>;

    async fn on_message(&self, _topic: &str, _message: &AgentMessage) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Adapts an [`Agent`] to the bus handler interface.
pub struct AgentHandler {
    agent: Arc<dyn Agent>,
    id: String,
}

impl AgentHandler {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        let id = format!("agent:{}", agent.name());
        Self { agent, id }
    }
}

#[async_trait]
impl MessageHandler for AgentHandler {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError> {
        self.agent.on_message(topic, &message).await
    }
}

/// How an LLM-backed agent produces text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    Live,
    /// LLM unreachable; deterministic templates only.
    Template,
}

/// Health-check the LLM once for an agent and decide its mode.
pub(crate) async fn probe_llm(
    agent: &str,
    llm: &Arc<dyn LlmClient>,
    allow_template: bool,
) -> Result<LlmMode, AgentError> {
    match llm.health_check().await {
        Ok(()) => {
            info!(agent, "LLM reachable");
            Ok(LlmMode::Live)
        }
        Err(e) if allow_template => {
            warn!(agent, error = %e, "LLM unreachable, using templates");
            Ok(LlmMode::Template)
        }
        Err(e) => Err(AgentError::Initialization(format!(
            "{agent}: LLM unreachable: {e}"
        ))),
    }
}

/// Publish through a weak bus reference. A dropped bus or a rejected
/// message is logged and otherwise ignored.
pub(crate) async fn publish_weak(bus: &Weak<MessageBus>, topic: &str, message: AgentMessage) {
    let Some(bus) = bus.upgrade() else {
        return;
    };
    if let Err(e) = bus.publish(topic, message).await {
        warn!(topic, error = %e, "Publish failed");
    }
}

/// The five fixed council roles.
#[derive(Clone)]
pub struct AgentSet {
    pub market: Arc<dyn Agent>,
    pub strategy: Arc<dyn Agent>,
    pub risk: Arc<dyn Agent>,
    pub executor: Arc<dyn Agent>,
    pub explainer: Arc<dyn Agent>,
}

impl AgentSet {
    pub fn all(&self) -> [&Arc<dyn Agent>; 5] {
        [
            &self.market,
            &self.strategy,
            &self.risk,
            &self.executor,
            &self.explainer,
        ]
    }

    /// Initialize every agent, then subscribe each to its topics.
    pub async fn initialize(&self, bus: &MessageBus) -> Result<(), AgentError> {
        for agent in self.all() {
            agent.initialize().await?;
            info!(agent = %agent.name(), role = agent.role().as_str(), "Agent initialized");
        }
        for agent in self.all() {
            let topics = agent.subscriptions();
            if topics.is_empty() {
                continue;
            }
            let handler: Arc<dyn MessageHandler> = Arc::new(AgentHandler::new(Arc::clone(agent)));
            for topic in topics {
                bus.subscribe(topic, Arc::clone(&handler));
            }
        }
        Ok(())
    }
}
