use async_trait::async_trait;
use council_models::{
    AgentRole, Contribution, ContributionContent, DeliberationState, RiskIssue, Verdict,
};

use crate::agent::Agent;
use crate::error::AgentError;
use crate::policy::RiskLimits;

pub const RISK_AGENT: &str = "risk_manager";

/// Reviews the current proposal against the limits for the user's tolerance.
#[derive(Debug, Default)]
pub struct RiskAgent;

fn summarize(verdict: Verdict, issues: &[RiskIssue], tolerance: &str) -> String {
    match verdict {
        Verdict::Accept => format!("Allocation is within {tolerance} risk limits."),
        Verdict::Revise => issues
            .iter()
            .map(RiskIssue::describe)
            .collect::<Vec<_>>()
            .join("; "),
    }
}

#[async_trait]
impl Agent for RiskAgent {
    fn name(&self) -> &str {
        RISK_AGENT
    }

    fn role(&self) -> AgentRole {
        AgentRole::Risk
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError> {
        let proposal = state
            .proposal
            .as_ref()
            .ok_or_else(|| AgentError::InvalidState("no proposal to review".to_string()))?;

        let tolerance = state.user_profile.risk_tolerance;
        let issues = RiskLimits::for_tolerance(tolerance).evaluate(&proposal.target_allocation);
        let verdict = if issues.is_empty() {
            Verdict::Accept
        } else {
            Verdict::Revise
        };

        Ok(Contribution::new(
            RISK_AGENT,
            state.round_number(),
            ContributionContent::Critique {
                verdict,
                summary: summarize(verdict, &issues, tolerance.as_str()),
                issues,
            },
        ))
    }
}
