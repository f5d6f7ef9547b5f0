pub mod agent_message;
pub mod analysis;
pub mod config;
pub mod deliberation;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod market;
pub mod portfolio;
pub mod store_schema;
pub mod strategy;

pub use agent_message::{
    AgentMessage, Alert, Communication, Importance, InterjectionAction, MessageBody, MessageType,
    SystemEvent, UserInterjection,
};
pub use analysis::{AgentReport, AnalysisResult, ResultStatus, OUTPUT_SCHEMA_VERSION};
pub use config::{
    BrokerBackend, BrokerConfig, BusConfig, CouncilConfig, DeliberationConfig, LlmBackend,
    LlmConfig, MarketDataConfig, MarketDataSourceKind, StoreConfig,
};
pub use deliberation::{
    AgentRole, Contribution, ContributionContent, DeliberationState, MarketOutlook, RiskIssue,
    SessionStatus, Verdict,
};
pub use envelope::WsEnvelope;
pub use error::ModelError;
pub use execution::{ExecutionReport, OrderStatus};
pub use market::{MarketSentiment, MarketSnapshot};
pub use portfolio::{AnalysisRequest, Holding, Portfolio, RiskTolerance, UserProfile, CASH_SYMBOL};
pub use store_schema::{RecordCategory, RecordRow};
pub use strategy::{
    normalize_allocation, validate_allocation, OrderType, RecommendedTrade, Strategy, TradeSide,
    ALLOCATION_TOLERANCE,
};
