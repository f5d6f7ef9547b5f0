use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::execution::ExecutionReport;
use crate::market::{MarketSentiment, MarketSnapshot};
use crate::portfolio::{Portfolio, UserProfile};
use crate::strategy::Strategy;

/// Lifecycle of one analysis session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Initializing,
    Analysis,
    Deliberation,
    Execution,
    Paused,
    Error,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Analysis => "analysis",
            SessionStatus::Deliberation => "deliberation",
            SessionStatus::Execution => "execution",
            SessionStatus::Paused => "paused",
            SessionStatus::Error => "error",
            SessionStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Stopped)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            Idle => matches!(next, Initializing | Stopped),
            Initializing => matches!(next, Analysis | Error | Stopped),
            Analysis => matches!(next, Deliberation | Paused | Error | Stopped),
            Deliberation => matches!(next, Execution | Paused | Error | Stopped),
            Paused => matches!(next, Deliberation | Error | Stopped),
            Execution => matches!(next, Error | Stopped),
            Error | Stopped => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Market,
    Strategy,
    Risk,
    Executor,
    Explainer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Market => "market",
            AgentRole::Strategy => "strategy",
            AgentRole::Risk => "risk",
            AgentRole::Executor => "executor",
            AgentRole::Explainer => "explainer",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Revise,
}

/// A single finding raised by the risk review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskIssue {
    /// A single security exceeds the per-position limit.
    Concentration {
        symbol: String,
        weight: Decimal,
        limit: Decimal,
    },
    /// A diversified core fund exceeds the core-fund limit.
    CoreOverweight {
        symbol: String,
        weight: Decimal,
        limit: Decimal,
    },
    CashBelowFloor { weight: Decimal, floor: Decimal },
    CashAboveCeiling { weight: Decimal, ceiling: Decimal },
    InvalidAllocation { reason: String },
}

impl RiskIssue {
    pub fn describe(&self) -> String {
        match self {
            RiskIssue::Concentration {
                symbol,
                weight,
                limit,
            } => format!("{symbol} at {weight}% exceeds single-position limit {limit}%"),
            RiskIssue::CoreOverweight {
                symbol,
                weight,
                limit,
            } => format!("{symbol} at {weight}% exceeds core-fund limit {limit}%"),
            RiskIssue::CashBelowFloor { weight, floor } => {
                format!("cash at {weight}% is below floor {floor}%")
            }
            RiskIssue::CashAboveCeiling { weight, ceiling } => {
                format!("cash at {weight}% is above ceiling {ceiling}%")
            }
            RiskIssue::InvalidAllocation { reason } => format!("invalid allocation: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketOutlook {
    pub snapshots: Vec<MarketSnapshot>,
    /// Symbols with no data at all.
    pub missing_symbols: Vec<String>,
    /// Symbols whose data is older than the freshness threshold.
    pub stale_symbols: Vec<String>,
    pub sentiment: MarketSentiment,
    pub summary: String,
}

impl MarketOutlook {
    pub fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.snapshots
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContributionContent {
    MarketOutlook(MarketOutlook),
    Proposal {
        strategy: Strategy,
    },
    Critique {
        verdict: Verdict,
        issues: Vec<RiskIssue>,
        summary: String,
    },
    Execution {
        reports: Vec<ExecutionReport>,
        /// Why execution stopped early, if it did.
        halted: Option<String>,
    },
    Explanation {
        text: String,
    },
}

/// One agent's output for one round. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contribution {
    pub agent_name: String,
    pub round_number: u32,
    pub content: ContributionContent,
    pub timestamp: DateTime<Utc>,
}

impl Contribution {
    pub fn new(agent_name: impl Into<String>, round_number: u32, content: ContributionContent) -> Self {
        Self {
            agent_name: agent_name.into(),
            round_number,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match &self.content {
            ContributionContent::Critique { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }
}

/// State of one analysis session, owned by a single orchestrator task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliberationState {
    pub session_id: Uuid,
    round_number: u32,
    max_rounds: u32,
    pub proposal: Option<Strategy>,
    transcript: Vec<Contribution>,
    transcript_capacity: usize,
    pub status: SessionStatus,
    pub approval_required: bool,
    pub portfolio: Portfolio,
    pub user_profile: UserProfile,
    /// Free-form comments the user interjected during deliberation.
    pub user_comments: Vec<String>,
}

impl DeliberationState {
    pub fn new(portfolio: Portfolio, user_profile: UserProfile, max_rounds: u32) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            round_number: 0,
            max_rounds,
            proposal: None,
            transcript: Vec::new(),
            // analysis (2) + risk/strategy per round + execution + explanation
            transcript_capacity: 2 * max_rounds as usize + 4,
            status: SessionStatus::Idle,
            approval_required: false,
            portfolio,
            user_profile,
            user_comments: Vec::new(),
        }
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn transcript(&self) -> &[Contribution] {
        &self.transcript
    }

    pub fn transcript_capacity(&self) -> usize {
        self.transcript_capacity
    }

    /// Move to the next round. Fails instead of exceeding `max_rounds`.
    pub fn advance_round(&mut self) -> Result<u32, ModelError> {
        if self.round_number >= self.max_rounds {
            return Err(ModelError::RoundLimit(self.max_rounds));
        }
        self.round_number += 1;
        Ok(self.round_number)
    }

    pub fn append(&mut self, contribution: Contribution) -> Result<(), ModelError> {
        if contribution.round_number > self.round_number {
            return Err(ModelError::FutureRound {
                contribution: contribution.round_number,
                session: self.round_number,
            });
        }
        if self.transcript.len() >= self.transcript_capacity {
            return Err(ModelError::TranscriptFull(self.transcript_capacity));
        }
        self.transcript.push(contribution);
        Ok(())
    }

    pub fn latest_outlook(&self) -> Option<&MarketOutlook> {
        self.transcript.iter().rev().find_map(|c| match &c.content {
            ContributionContent::MarketOutlook(outlook) => Some(outlook),
            _ => None,
        })
    }

    /// The critique issued in the current round, if any.
    pub fn current_critique(&self) -> Option<(Verdict, &[RiskIssue])> {
        self.transcript
            .iter()
            .rev()
            .take_while(|c| c.round_number == self.round_number)
            .find_map(|c| match &c.content {
                ContributionContent::Critique {
                    verdict, issues, ..
                } => Some((*verdict, issues.as_slice())),
                _ => None,
            })
    }

    pub fn execution_reports(&self) -> Vec<ExecutionReport> {
        self.transcript
            .iter()
            .filter_map(|c| match &c.content {
                ContributionContent::Execution { reports, .. } => Some(reports.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn execution_halt(&self) -> Option<&str> {
        self.transcript.iter().rev().find_map(|c| match &c.content {
            ContributionContent::Execution {
                halted: Some(reason),
                ..
            } => Some(reason.as_str()),
            _ => None,
        })
    }

    pub fn accepted(&self) -> bool {
        self.transcript
            .iter()
            .rev()
            .find_map(Contribution::verdict)
            .is_some_and(|v| v == Verdict::Accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::RiskTolerance;
    use rust_decimal_macros::dec;

    fn state(max_rounds: u32) -> DeliberationState {
        DeliberationState::new(
            Portfolio {
                id: Uuid::new_v4(),
                cash: dec!(1000),
                holdings: vec![],
            },
            UserProfile {
                user_id: "u-1".to_string(),
                risk_tolerance: RiskTolerance::Moderate,
                investment_horizon_years: None,
                require_user_approval: None,
            },
            max_rounds,
        )
    }

    fn critique(round: u32, verdict: Verdict) -> Contribution {
        Contribution::new(
            "risk_manager",
            round,
            ContributionContent::Critique {
                verdict,
                issues: vec![],
                summary: "ok".to_string(),
            },
        )
    }

    #[test]
    fn round_number_is_bounded() {
        let mut state = state(2);
        assert_eq!(state.advance_round().unwrap(), 1);
        assert_eq!(state.advance_round().unwrap(), 2);
        assert_eq!(state.advance_round(), Err(ModelError::RoundLimit(2)));
        assert_eq!(state.round_number(), 2);
    }

    #[test]
    fn append_then_read_back_is_identical() {
        let mut state = state(3);
        state.advance_round().unwrap();
        let contribution = Contribution::new(
            "explainer",
            1,
            ContributionContent::Explanation {
                text: "Rebalanced toward core funds.".to_string(),
            },
        );
        state.append(contribution.clone()).unwrap();
        let stored = state.transcript().last().unwrap();
        assert_eq!(stored.agent_name, contribution.agent_name);
        assert_eq!(stored.round_number, contribution.round_number);
        assert_eq!(stored.content, contribution.content);
    }

    #[test]
    fn append_rejects_future_rounds() {
        let mut state = state(3);
        let result = state.append(critique(1, Verdict::Accept));
        assert_eq!(
            result,
            Err(ModelError::FutureRound {
                contribution: 1,
                session: 0
            })
        );
    }

    #[test]
    fn transcript_is_bounded() {
        let mut state = state(1);
        let capacity = state.transcript_capacity();
        assert_eq!(capacity, 6);
        for _ in 0..capacity {
            state.append(critique(0, Verdict::Revise)).unwrap();
        }
        assert_eq!(
            state.append(critique(0, Verdict::Revise)),
            Err(ModelError::TranscriptFull(capacity))
        );
    }

    #[test]
    fn current_critique_only_sees_this_round() {
        let mut state = state(3);
        state.advance_round().unwrap();
        state.append(critique(1, Verdict::Revise)).unwrap();
        assert_eq!(state.current_critique().map(|(v, _)| v), Some(Verdict::Revise));
        state.advance_round().unwrap();
        assert!(state.current_critique().is_none());
        assert!(!state.accepted());
        state.append(critique(2, Verdict::Accept)).unwrap();
        assert!(state.accepted());
    }

    #[test]
    fn transitions_follow_state_machine() {
        use SessionStatus::*;
        assert!(Idle.can_transition_to(Initializing));
        assert!(Deliberation.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Deliberation));
        assert!(Execution.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Execution));
        assert!(!Stopped.can_transition_to(Deliberation));
        assert!(!Error.can_transition_to(Stopped));
        assert!(Error.is_terminal() && Stopped.is_terminal());
    }

    #[test]
    fn risk_issue_tagging() {
        let issue = RiskIssue::CashBelowFloor {
            weight: dec!(1.5),
            floor: dec!(2),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "cash_below_floor");
        assert!(issue.describe().contains("below floor"));
    }
}
