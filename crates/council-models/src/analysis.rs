use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deliberation::{AgentRole, Contribution, SessionStatus};
use crate::execution::ExecutionReport;
use crate::strategy::Strategy;

pub const OUTPUT_SCHEMA_VERSION: u32 = 1;

/// How an analysis run ended, as seen by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Deliberation finished and, if trades were recommended, they were executed.
    Completed,
    /// A final strategy exists but needs an explicit user approval to execute.
    AwaitingApproval,
    /// The user rejected the strategy.
    Rejected,
    Cancelled,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::AwaitingApproval => "awaiting_approval",
            ResultStatus::Rejected => "rejected",
            ResultStatus::Cancelled => "cancelled",
            ResultStatus::Error => "error",
        }
    }

    /// Session state a run with this outcome ends in.
    pub fn final_session_status(&self) -> SessionStatus {
        match self {
            ResultStatus::Error => SessionStatus::Error,
            _ => SessionStatus::Stopped,
        }
    }
}

/// Per-agent accounting for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentReport {
    pub agent_name: String,
    pub role: AgentRole,
    pub contributions: u32,
    pub abstentions: u32,
    pub elapsed_ms: u64,
}

/// Response body of an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub schema_version: u32,
    pub session_id: Uuid,
    pub status: ResultStatus,
    /// Sanitized, user-facing message. Raw collaborator errors are never included.
    pub message: String,
    pub final_status: SessionStatus,
    pub strategy: Option<Strategy>,
    pub approval_required: bool,
    pub rounds_completed: u32,
    pub transcript: Vec<Contribution>,
    pub execution_reports: Vec<ExecutionReport>,
    pub explanation: Option<String>,
    pub agent_reports: Vec<AgentReport>,
    pub processing_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Completed
    }
}
