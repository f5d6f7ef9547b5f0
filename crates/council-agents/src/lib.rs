pub mod agent;
pub mod agents;
pub mod broker;
pub mod bus;
pub mod claude_cli;
pub mod context;
pub mod error;
pub mod llm;
pub mod market_data;
pub mod orchestrator;
pub mod parser;
pub mod policy;
pub mod prompts;
pub mod relay;
pub mod session;

pub mod test_support;

pub use agent::{Agent, AgentHandler, AgentSet, LlmMode};
pub use agents::standard_agents;
pub use broker::{select_broker, BrokerClient, OrderAck, OrderRequest, PaperBroker};
pub use bus::{topics, DeliveryFailure, DeliveryReport, MessageBus, MessageHandler, Subscription};
pub use context::AppContext;
pub use error::{AgentError, BrokerError, BusError, LlmError, MarketDataError};
pub use llm::{select_llm, ClaudeCliClient, CompletionRequest, LlmClient, OfflineLlm};
pub use market_data::{select_market_data, MarketDataSource, StaticMarketData, StoreMarketData};
pub use orchestrator::Orchestrator;
pub use policy::{AllocationPolicy, ProfileAllocationPolicy, RiskLimits};
pub use relay::{RelayForwarder, WsRelay};
pub use session::{InterjectionRouter, SessionControl, SessionHandle};
