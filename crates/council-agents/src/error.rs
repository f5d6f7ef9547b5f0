use council_models::ModelError;
use council_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("LLM timed out after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ModelError),

    #[error("Channel closed: {0}")]
    Closed(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl AgentError {
    /// Message safe to show a user. Collaborator details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AgentError::Initialization(_) => "The advisory agents could not be started".to_string(),
            AgentError::Timeout(_) => "An agent did not respond in time".to_string(),
            AgentError::Broker(_) => "Trade execution failed".to_string(),
            AgentError::InvalidState(reason) => format!("Session could not continue: {reason}"),
            AgentError::Model(ModelError::InvalidAllocation(_)) => {
                "The proposed allocation was invalid".to_string()
            }
            _ => "Analysis failed due to an internal error".to_string(),
        }
    }
}
