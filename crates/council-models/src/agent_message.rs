use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deliberation::{Contribution, SessionStatus};
use crate::error::ModelError;
use crate::execution::ExecutionReport;
use crate::portfolio::RiskTolerance;
use crate::strategy::RecommendedTrade;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Communication,
    UserInput,
    SystemEvent,
    TradeExecuted,
    Alert,
    Debug,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Communication => "communication",
            MessageType::UserInput => "user_input",
            MessageType::SystemEvent => "system_event",
            MessageType::TradeExecuted => "trade_executed",
            MessageType::Alert => "alert",
            MessageType::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterjectionAction {
    Pause,
    Comment,
    AdjustRisk,
    Approve,
    Reject,
}

/// A human-in-the-loop instruction addressed to one running session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInterjection {
    pub session_id: Uuid,
    pub action: InterjectionAction,
    #[serde(default)]
    pub comment: Option<String>,
    /// Required for `adjust_risk`.
    #[serde(default)]
    pub risk_tolerance: Option<RiskTolerance>,
}

impl UserInterjection {
    pub fn new(session_id: Uuid, action: InterjectionAction) -> Self {
        Self {
            session_id,
            action,
            comment: None,
            risk_tolerance: None,
        }
    }

    pub fn comment(session_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            comment: Some(text.into()),
            ..Self::new(session_id, InterjectionAction::Comment)
        }
    }

    pub fn adjust_risk(session_id: Uuid, tolerance: RiskTolerance) -> Self {
        Self {
            risk_tolerance: Some(tolerance),
            ..Self::new(session_id, InterjectionAction::AdjustRisk)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Communication {
    Text { text: String },
    Contribution(Contribution),
    TradeRequest {
        session_id: Uuid,
        trade: RecommendedTrade,
    },
    Explanation { session_id: Uuid, text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemEvent {
    StatusChanged {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        round: u32,
        reason: Option<String>,
    },
    RoundStarted {
        session_id: Uuid,
        round: u32,
    },
    Abstention {
        session_id: Uuid,
        agent: String,
        round: u32,
        consecutive: u32,
        reason: String,
    },
    AwaitingApproval {
        session_id: Uuid,
        round: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub session_id: Option<Uuid>,
    pub text: String,
}

/// Typed payload; the variant determines the message type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageBody {
    Communication(Communication),
    UserInput(UserInterjection),
    SystemEvent(SystemEvent),
    TradeExecuted(ExecutionReport),
    Alert(Alert),
    Debug(serde_json::Value),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Communication(_) => MessageType::Communication,
            MessageBody::UserInput(_) => MessageType::UserInput,
            MessageBody::SystemEvent(_) => MessageType::SystemEvent,
            MessageBody::TradeExecuted(_) => MessageType::TradeExecuted,
            MessageBody::Alert(_) => MessageType::Alert,
            MessageBody::Debug(_) => MessageType::Debug,
        }
    }

    /// One-line human readable rendering, used for relay envelopes and logs.
    pub fn summary(&self) -> String {
        match self {
            MessageBody::Communication(Communication::Text { text }) => text.clone(),
            MessageBody::Communication(Communication::Contribution(c)) => {
                format!("{} contributed in round {}", c.agent_name, c.round_number)
            }
            MessageBody::Communication(Communication::TradeRequest { trade, .. }) => format!(
                "trade request: {:?} {} {}",
                trade.side, trade.quantity, trade.symbol
            ),
            MessageBody::Communication(Communication::Explanation { text, .. }) => text.clone(),
            MessageBody::UserInput(input) => format!("user {:?}", input.action),
            MessageBody::SystemEvent(SystemEvent::StatusChanged { from, to, .. }) => {
                format!("status {} -> {}", from.as_str(), to.as_str())
            }
            MessageBody::SystemEvent(SystemEvent::RoundStarted { round, .. }) => {
                format!("round {round} started")
            }
            MessageBody::SystemEvent(SystemEvent::Abstention { agent, round, .. }) => {
                format!("{agent} abstained in round {round}")
            }
            MessageBody::SystemEvent(SystemEvent::AwaitingApproval { .. }) => {
                "awaiting user approval".to_string()
            }
            MessageBody::TradeExecuted(report) => format!(
                "{} {} {}: {}",
                match report.side {
                    crate::strategy::TradeSide::Buy => "buy",
                    crate::strategy::TradeSide::Sell => "sell",
                },
                report.quantity,
                report.symbol,
                report.status.as_str()
            ),
            MessageBody::Alert(alert) => alert.text.clone(),
            MessageBody::Debug(_) => "debug".to_string(),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| Err(ModelError::InvalidMessage(reason.to_string()));
        match self {
            MessageBody::Communication(Communication::Text { text })
            | MessageBody::Communication(Communication::Explanation { text, .. })
                if text.trim().is_empty() =>
            {
                invalid("communication text is empty")
            }
            MessageBody::Communication(Communication::TradeRequest { trade, .. })
                if trade.quantity <= Decimal::ZERO =>
            {
                invalid("trade request quantity must be positive")
            }
            MessageBody::UserInput(input) => match input.action {
                InterjectionAction::AdjustRisk if input.risk_tolerance.is_none() => {
                    invalid("adjust_risk requires risk_tolerance")
                }
                InterjectionAction::Comment
                    if input.comment.as_deref().map_or(true, |c| c.trim().is_empty()) =>
                {
                    invalid("comment requires text")
                }
                _ => Ok(()),
            },
            MessageBody::TradeExecuted(report) if report.quantity <= Decimal::ZERO => {
                invalid("executed quantity must be positive")
            }
            MessageBody::Alert(alert) if alert.text.trim().is_empty() => {
                invalid("alert text is empty")
            }
            _ => Ok(()),
        }
    }
}

/// Envelope for everything that travels over the message bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from_agent: String,
    /// `None` means broadcast.
    pub to_agent: Option<String>,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AgentMessage {
    pub fn new(from_agent: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent: None,
            body,
            timestamp: Utc::now(),
            importance: Importance::Medium,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn to(mut self, agent: impl Into<String>) -> Self {
        self.to_agent = Some(agent.into());
        self
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Structural checks applied by the bus before delivery.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.from_agent.trim().is_empty() {
            return Err(ModelError::InvalidMessage("from_agent is empty".to_string()));
        }
        if !(self.metadata.is_object() || self.metadata.is_null()) {
            return Err(ModelError::InvalidMessage(
                "metadata must be an object".to_string(),
            ));
        }
        self.body.validate()
    }
}
