use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use council_models::config::LlmConfig;
use council_models::{
    AgentMessage, AgentRole, Communication, Contribution, ContributionContent, DeliberationState,
    ExecutionReport, MessageBody, OrderStatus, RecommendedTrade, RiskIssue, RiskTolerance,
    TradeSide, CASH_SYMBOL,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::agent::{probe_llm, publish_weak, Agent, LlmMode};
use crate::bus::{topics, MessageBus};
use crate::error::{AgentError, LlmError};
use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::explainer_system_prompt;

pub const EXPLAINER_AGENT: &str = "explainer";

/// Everything the explanation is allowed to talk about.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExplanationRecord {
    pub risk_tolerance: RiskTolerance,
    pub target_allocation: BTreeMap<String, Decimal>,
    pub trades: Vec<RecommendedTrade>,
    pub accepted: bool,
    pub approval_required: bool,
    pub rounds: u32,
    pub open_issues: Vec<String>,
    pub executions: Vec<ExecutionReport>,
    pub halted: Option<String>,
    pub user_comments: Vec<String>,
}

impl ExplanationRecord {
    pub fn from_state(state: &DeliberationState) -> Self {
        let (target_allocation, trades) = state
            .proposal
            .as_ref()
            .map(|p| (p.target_allocation.clone(), p.recommended_trades.clone()))
            .unwrap_or_default();

        let accepted = state.accepted();
        let open_issues = if accepted {
            Vec::new()
        } else {
            state
                .transcript()
                .iter()
                .rev()
                .find_map(|c| match &c.content {
                    ContributionContent::Critique { issues, .. } => {
                        Some(issues.iter().map(RiskIssue::describe).collect())
                    }
                    _ => None,
                })
                .unwrap_or_default()
        };

        Self {
            risk_tolerance: state.user_profile.risk_tolerance,
            target_allocation,
            trades,
            accepted,
            approval_required: state.approval_required,
            rounds: state.round_number(),
            open_issues,
            executions: state.execution_reports(),
            halted: state.execution_halt().map(str::to_string),
            user_comments: state.user_comments.clone(),
        }
    }
}

/// Deterministic explanation of `record`. Never empty.
pub fn explain(record: &ExplanationRecord) -> String {
    let mut paragraphs = Vec::new();

    if record.target_allocation.is_empty() {
        paragraphs.push(format!(
            "No strategy was produced for your {} profile.",
            record.risk_tolerance.as_str()
        ));
    } else {
        let allocation = record
            .target_allocation
            .iter()
            .filter(|(_, w)| **w > Decimal::ZERO)
            .map(|(s, w)| {
                if s == CASH_SYMBOL {
                    format!("cash {}%", w.round_dp(2))
                } else {
                    format!("{s} {}%", w.round_dp(2))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        paragraphs.push(format!(
            "For your {} profile the council recommends: {allocation}.",
            record.risk_tolerance.as_str()
        ));
    }

    if record.trades.is_empty() {
        paragraphs.push("No trades are needed to reach this allocation.".to_string());
    } else {
        let trades = record
            .trades
            .iter()
            .map(|t| {
                let side = match t.side {
                    TradeSide::Buy => "buy",
                    TradeSide::Sell => "sell",
                };
                format!("{side} {} {}", t.quantity, t.symbol)
            })
            .collect::<Vec<_>>()
            .join(", ");
        paragraphs.push(format!("Recommended trades: {trades}."));
    }

    let rounds = match record.rounds {
        0 => "before any risk review".to_string(),
        1 => "after 1 round".to_string(),
        n => format!("after {n} rounds"),
    };
    if record.accepted {
        paragraphs.push(format!("The risk review accepted the plan {rounds}."));
    } else if record.open_issues.is_empty() {
        paragraphs.push(format!("The risk review did not sign off on the plan {rounds}."));
    } else {
        paragraphs.push(format!(
            "The risk review did not sign off {rounds}. Open issues: {}.",
            record.open_issues.join("; ")
        ));
    }

    if !record.user_comments.is_empty() {
        paragraphs.push(format!(
            "Your comments were considered: {}.",
            record.user_comments.join("; ")
        ));
    }

    if record.executions.is_empty() {
        if record.approval_required {
            paragraphs.push("Nothing was executed. Your approval is required first.".to_string());
        } else if !record.trades.is_empty() {
            paragraphs.push("Nothing was executed.".to_string());
        }
    } else {
        let filled = record
            .executions
            .iter()
            .filter(|r| r.status == OrderStatus::Filled)
            .count();
        paragraphs.push(format!(
            "{filled} of {} submitted orders were filled.",
            record.executions.len()
        ));
    }
    if let Some(reason) = &record.halted {
        paragraphs.push(format!("Execution stopped early: {reason}."));
    }

    paragraphs.join(" ")
}

/// Summarizes the session for the user.
pub struct ExplainerAgent {
    llm: Arc<dyn LlmClient>,
    llm_config: LlmConfig,
    bus: Weak<MessageBus>,
    mode: OnceCell<LlmMode>,
}

impl ExplainerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, llm_config: LlmConfig, bus: Weak<MessageBus>) -> Self {
        Self {
            llm,
            llm_config,
            bus,
            mode: OnceCell::new(),
        }
    }

    async fn narrate(&self, record: &ExplanationRecord) -> Result<String, AgentError> {
        let text = self
            .llm
            .complete(&CompletionRequest {
                system_prompt: explainer_system_prompt(),
                prompt: serde_json::to_string_pretty(record)?,
                model: self.llm_config.model.clone(),
                max_tokens: self.llm_config.max_tokens,
            })
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Agent for ExplainerAgent {
    fn name(&self) -> &str {
        EXPLAINER_AGENT
    }

    fn role(&self) -> AgentRole {
        AgentRole::Explainer
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.mode
            .get_or_try_init(|| probe_llm(EXPLAINER_AGENT, &self.llm, self.llm_config.demo_mode))
            .await?;
        Ok(())
    }

    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError> {
        let record = ExplanationRecord::from_state(state);

        let text = match self.mode.get() {
            Some(LlmMode::Live) => match self.narrate(&record).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(agent = EXPLAINER_AGENT, error = %e, "LLM explanation failed, using template");
                    explain(&record)
                }
            },
            _ => explain(&record),
        };
        debug!(chars = text.len(), "Explanation ready");

        publish_weak(
            &self.bus,
            topics::EXPLANATION,
            AgentMessage::new(
                EXPLAINER_AGENT,
                MessageBody::Communication(Communication::Explanation {
                    session_id: state.session_id,
                    text: text.clone(),
                }),
            ),
        )
        .await;

        Ok(Contribution::new(
            EXPLAINER_AGENT,
            state.round_number(),
            ContributionContent::Explanation { text },
        ))
    }
}
