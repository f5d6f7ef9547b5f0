use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_message::AgentMessage;

/// Frame pushed to relay observers (UI clients).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl From<&AgentMessage> for WsEnvelope {
    fn from(message: &AgentMessage) -> Self {
        Self {
            kind: message.message_type().as_str().to_string(),
            from: message.from_agent.clone(),
            to: message.to_agent.clone(),
            content: message.body.summary(),
            timestamp: message.timestamp,
            data: serde_json::to_value(&message.body).unwrap_or(serde_json::Value::Null),
        }
    }
}
