use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use council_models::{
    AgentMessage, AgentReport, AgentRole, AnalysisRequest, AnalysisResult, Alert, Communication,
    Contribution, ContributionContent, DeliberationConfig, DeliberationState, Importance,
    InterjectionAction, MessageBody, ResultStatus, SessionStatus, SystemEvent, UserInterjection,
    Verdict, OUTPUT_SCHEMA_VERSION,
};
use council_store::RecordStore;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentSet};
use crate::agents::{explain, ExplanationRecord, EXPLAINER_AGENT};
use crate::bus::{topics, MessageBus, MessageHandler, Subscription};
use crate::context::AppContext;
use crate::error::AgentError;
use crate::session::{InterjectionRouter, SessionControl, SessionHandle, INBOX_CAPACITY};

const ORCHESTRATOR: &str = "orchestrator";

/// Runs deliberation sessions over a fixed set of agents.
pub struct Orchestrator {
    agents: AgentSet,
    bus: Arc<MessageBus>,
    store: Option<Arc<RecordStore>>,
    config: DeliberationConfig,
    router: Arc<InterjectionRouter>,
    user_input: Subscription,
    init: OnceCell<()>,
}

impl Orchestrator {
    pub fn new(
        agents: AgentSet,
        bus: Arc<MessageBus>,
        store: Option<Arc<RecordStore>>,
        config: DeliberationConfig,
    ) -> Self {
        let router = Arc::new(InterjectionRouter::default());
        let handler: Arc<dyn MessageHandler> = Arc::clone(&router) as Arc<dyn MessageHandler>;
        let user_input = bus.subscribe(topics::USER_INPUT, handler);
        Self {
            agents,
            bus,
            store,
            config,
            router,
            user_input,
            init: OnceCell::new(),
        }
    }

    pub fn from_context(ctx: &AppContext, agents: AgentSet) -> Self {
        Self::new(
            agents,
            Arc::clone(&ctx.bus),
            ctx.store.clone(),
            ctx.config.deliberation.clone(),
        )
    }

    /// Open a session. The handle may be used from other tasks while
    /// `run_with` drives the control side.
    pub fn session(&self) -> (SessionHandle, SessionControl) {
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.router.register(session_id, tx.clone());
        (
            SessionHandle::new(session_id, cancel.clone(), tx),
            SessionControl::new(session_id, cancel, rx, Arc::downgrade(&self.router)),
        )
    }

    /// Run a session nobody interjects in.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisResult, AgentError> {
        let (_handle, control) = self.session();
        self.run_with(request, control).await
    }

    /// Run a session to completion. Only a malformed request is an `Err`;
    /// every other failure is reported through the result's status.
    pub async fn run_with(
        &self,
        request: AnalysisRequest,
        mut control: SessionControl,
    ) -> Result<AnalysisResult, AgentError> {
        validate_request(&request)?;
        let mut session = Session::new(self, request, &mut control);
        Ok(session.run().await)
    }

    async fn ensure_initialized(&self) -> Result<(), AgentError> {
        self.init
            .get_or_try_init(|| self.agents.initialize(&self.bus))
            .await?;
        Ok(())
    }

    fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.config.agent_timeout_seconds)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.user_input);
    }
}

fn validate_request(request: &AnalysisRequest) -> Result<(), AgentError> {
    if request.portfolio.cash < Decimal::ZERO {
        return Err(AgentError::InvalidState(
            "portfolio cash must not be negative".to_string(),
        ));
    }
    if let Some(holding) = request
        .portfolio
        .holdings
        .iter()
        .find(|h| h.quantity < Decimal::ZERO || h.market_value < Decimal::ZERO)
    {
        return Err(AgentError::InvalidState(format!(
            "holding {} must not be negative",
            holding.symbol
        )));
    }
    Ok(())
}

/// How the run ended before the explanation and terminal transition.
enum Ending {
    Completed,
    AwaitingApproval,
    Rejected,
    Cancelled,
    Halted(String),
    Failed(AgentError),
}

/// What a batch of interjections asks the loop to do.
enum Directive {
    Continue,
    Pause,
    Reject,
}

#[derive(Default)]
struct Tally {
    contributions: u32,
    abstentions: u32,
    consecutive: u32,
    elapsed: Duration,
}

struct Session<'a> {
    orch: &'a Orchestrator,
    control: &'a mut SessionControl,
    state: DeliberationState,
    tallies: HashMap<AgentRole, Tally>,
    approved: bool,
    started: Instant,
}

impl<'a> Session<'a> {
    fn new(orch: &'a Orchestrator, request: AnalysisRequest, control: &'a mut SessionControl) -> Self {
        let mut state = DeliberationState::new(
            request.portfolio,
            request.user_profile,
            orch.config.max_deliberation_rounds,
        );
        state.session_id = control.session_id;
        Self {
            orch,
            control,
            state,
            tallies: HashMap::new(),
            approved: false,
            started: Instant::now(),
        }
    }

    async fn run(&mut self) -> AnalysisResult {
        info!(
            session_id = %self.state.session_id,
            tolerance = self.state.user_profile.risk_tolerance.as_str(),
            max_rounds = self.state.max_rounds(),
            "Session started"
        );

        let ending = match self.drive().await {
            Ok(ending) => ending,
            Err(e) => {
                error!(session_id = %self.state.session_id, error = %e, "Session failed");
                Ending::Failed(e)
            }
        };

        if !matches!(ending, Ending::Cancelled) {
            self.narrate().await;
        }
        let result = self.conclude(ending).await;
        self.persist(&result).await;

        info!(
            session_id = %result.session_id,
            status = result.status.as_str(),
            rounds = result.rounds_completed,
            elapsed_ms = result.processing_time_ms,
            "Session finished"
        );
        result
    }

    async fn drive(&mut self) -> Result<Ending, AgentError> {
        let orch = self.orch;

        self.transition(SessionStatus::Initializing, None).await?;
        orch.ensure_initialized().await?;

        self.transition(SessionStatus::Analysis, None).await?;
        self.contribute(&orch.agents.market, Some(orch.agent_timeout()))
            .await?;
        while self.state.proposal.is_none() {
            if self.control.cancel.is_cancelled() {
                return Ok(Ending::Cancelled);
            }
            self.contribute(&orch.agents.strategy, Some(orch.agent_timeout()))
                .await?;
        }

        self.transition(SessionStatus::Deliberation, None).await?;
        for round in 1..=self.state.max_rounds() {
            if self.control.cancel.is_cancelled() {
                return Ok(Ending::Cancelled);
            }
            match self.drain_interjections() {
                Directive::Continue => {}
                Directive::Reject => return Ok(Ending::Rejected),
                Directive::Pause => {
                    if let Some(ending) = self.pause().await? {
                        return Ok(ending);
                    }
                }
            }

            self.state.advance_round()?;
            self.announce(
                topics::SYSTEM_EVENT,
                MessageBody::SystemEvent(SystemEvent::RoundStarted {
                    session_id: self.state.session_id,
                    round,
                }),
            )
            .await;

            let critique = self
                .contribute(&orch.agents.risk, Some(orch.agent_timeout()))
                .await?;
            let Some(critique) = critique else {
                debug!(round, "Risk review abstained, keeping current proposal");
                continue;
            };
            if critique.verdict() == Some(Verdict::Accept) || round == self.state.max_rounds() {
                break;
            }
            self.contribute(&orch.agents.strategy, Some(orch.agent_timeout()))
                .await?;
        }

        if !self.state.accepted() {
            self.state.approval_required = true;
            warn!(
                session_id = %self.state.session_id,
                rounds = self.state.round_number(),
                "No consensus reached, approval required"
            );
            self.announce(
                topics::ALERT,
                MessageBody::Alert(Alert {
                    session_id: Some(self.state.session_id),
                    text: format!(
                        "No consensus after {} rounds; the last proposal needs your approval",
                        self.state.round_number()
                    ),
                }),
            )
            .await;
        }

        if self.control.cancel.is_cancelled() {
            return Ok(Ending::Cancelled);
        }
        if let Directive::Reject = self.drain_interjections() {
            return Ok(Ending::Rejected);
        }

        let requires_approval = self
            .state
            .user_profile
            .require_user_approval
            .unwrap_or(orch.config.require_user_approval)
            || self.state.approval_required;
        if requires_approval && !self.approved {
            self.state.approval_required = true;
            match self.await_approval().await {
                Some(ending) => return Ok(ending),
                None => self.state.approval_required = false,
            }
        }

        let has_trades = self
            .state
            .proposal
            .as_ref()
            .is_some_and(|p| !p.recommended_trades.is_empty());
        if !has_trades {
            return Ok(Ending::Completed);
        }

        self.transition(SessionStatus::Execution, None).await?;
        // Orders are never timed out mid-flight.
        if self.contribute(&orch.agents.executor, None).await?.is_none() {
            return Err(AgentError::InvalidState(
                "execution could not be started".to_string(),
            ));
        }
        match self.state.execution_halt() {
            Some(reason) => Ok(Ending::Halted(reason.to_string())),
            None => Ok(Ending::Completed),
        }
    }

    /// Run one agent against the current state. `Ok(None)` is an abstention;
    /// `Err` means the agent exhausted its consecutive abstentions.
    async fn contribute(
        &mut self,
        agent: &Arc<dyn Agent>,
        timeout: Option<Duration>,
    ) -> Result<Option<Contribution>, AgentError> {
        let started = Instant::now();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, agent.contribute(&self.state)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::Timeout(limit.as_secs())),
            },
            None => agent.contribute(&self.state).await,
        };

        let consecutive = {
            let tally = self.tallies.entry(agent.role()).or_default();
            tally.elapsed += started.elapsed();
            match &outcome {
                Ok(_) => {
                    tally.contributions += 1;
                    tally.consecutive = 0;
                }
                Err(_) => {
                    tally.abstentions += 1;
                    tally.consecutive += 1;
                }
            }
            tally.consecutive
        };

        match outcome {
            Ok(contribution) => {
                self.record(contribution.clone()).await?;
                Ok(Some(contribution))
            }
            Err(e) => {
                let round = self.state.round_number();
                warn!(
                    session_id = %self.state.session_id,
                    agent = %agent.name(),
                    round,
                    consecutive,
                    error = %e,
                    "Agent abstained"
                );
                self.announce(
                    topics::SYSTEM_EVENT,
                    MessageBody::SystemEvent(SystemEvent::Abstention {
                        session_id: self.state.session_id,
                        agent: agent.name().to_string(),
                        round,
                        consecutive,
                        reason: e.public_message(),
                    }),
                )
                .await;

                if consecutive >= self.orch.config.max_consecutive_abstentions {
                    error!(
                        session_id = %self.state.session_id,
                        agent = %agent.name(),
                        consecutive,
                        "Abstention limit reached"
                    );
                    return Err(AgentError::InvalidState(format!(
                        "{} abstained {consecutive} times in a row",
                        agent.name()
                    )));
                }
                Ok(None)
            }
        }
    }

    /// Append to the transcript, adopt proposals and publish.
    async fn record(&mut self, contribution: Contribution) -> Result<(), AgentError> {
        self.state.append(contribution.clone())?;
        if let ContributionContent::Proposal { strategy } = &contribution.content {
            self.state.proposal = Some(strategy.clone());
        }
        let from = contribution.agent_name.clone();
        self.announce_from(
            &from,
            topics::DELIBERATION,
            MessageBody::Communication(Communication::Contribution(contribution)),
        )
        .await;
        Ok(())
    }

    async fn transition(
        &mut self,
        to: SessionStatus,
        reason: Option<String>,
    ) -> Result<(), AgentError> {
        let from = self.state.status;
        if !from.can_transition_to(to) {
            return Err(AgentError::InvalidState(format!(
                "illegal transition {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }
        self.state.status = to;
        info!(
            session_id = %self.state.session_id,
            from = from.as_str(),
            to = to.as_str(),
            round = self.state.round_number(),
            "Status changed"
        );
        self.announce(
            topics::SYSTEM_EVENT,
            MessageBody::SystemEvent(SystemEvent::StatusChanged {
                session_id: self.state.session_id,
                from,
                to,
                round: self.state.round_number(),
                reason,
            }),
        )
        .await;
        Ok(())
    }

    fn apply(&mut self, interjection: UserInterjection) -> Option<Directive> {
        if interjection.session_id != self.state.session_id {
            warn!(session_id = %interjection.session_id, "Ignoring interjection for another session");
            return None;
        }
        debug!(action = ?interjection.action, "Interjection received");
        match interjection.action {
            InterjectionAction::Pause => Some(Directive::Pause),
            InterjectionAction::Reject => Some(Directive::Reject),
            InterjectionAction::Approve => {
                self.approved = true;
                Some(Directive::Continue)
            }
            InterjectionAction::Comment => {
                if let Some(comment) = interjection.comment {
                    self.state.user_comments.push(comment);
                }
                Some(Directive::Continue)
            }
            InterjectionAction::AdjustRisk => {
                if let Some(tolerance) = interjection.risk_tolerance {
                    info!(
                        from = self.state.user_profile.risk_tolerance.as_str(),
                        to = tolerance.as_str(),
                        "Risk tolerance adjusted"
                    );
                    self.state.user_profile.risk_tolerance = tolerance;
                }
                Some(Directive::Continue)
            }
        }
    }

    /// Apply everything queued so far. A later resume cancels an earlier pause.
    fn drain_interjections(&mut self) -> Directive {
        let mut paused = false;
        while let Ok(interjection) = self.control.rx.try_recv() {
            match self.apply(interjection) {
                Some(Directive::Reject) => return Directive::Reject,
                Some(Directive::Pause) => paused = true,
                Some(Directive::Continue) => paused = false,
                None => {}
            }
        }
        if paused {
            Directive::Pause
        } else {
            Directive::Continue
        }
    }

    /// Wait in `paused` until the user resumes, rejects or cancels.
    async fn pause(&mut self) -> Result<Option<Ending>, AgentError> {
        self.transition(SessionStatus::Paused, Some("paused by user".to_string()))
            .await?;
        loop {
            let next = tokio::select! {
                _ = self.control.cancel.cancelled() => return Ok(Some(Ending::Cancelled)),
                next = self.control.rx.recv() => next,
            };
            let Some(interjection) = next else {
                return Err(AgentError::InvalidState(
                    "session inbox closed while paused".to_string(),
                ));
            };
            match self.apply(interjection) {
                Some(Directive::Continue) => break,
                Some(Directive::Reject) => return Ok(Some(Ending::Rejected)),
                Some(Directive::Pause) | None => {}
            }
        }
        self.transition(SessionStatus::Deliberation, Some("resumed by user".to_string()))
            .await?;
        Ok(None)
    }

    /// `None` once approved. Otherwise how the session ends without executing.
    async fn await_approval(&mut self) -> Option<Ending> {
        self.announce(
            topics::SYSTEM_EVENT,
            MessageBody::SystemEvent(SystemEvent::AwaitingApproval {
                session_id: self.state.session_id,
                round: self.state.round_number(),
            }),
        )
        .await;

        let wait = Duration::from_secs(self.orch.config.approval_wait_seconds);
        let deadline = tokio::time::Instant::now() + wait;
        while !self.approved {
            let next = tokio::select! {
                _ = self.control.cancel.cancelled() => return Some(Ending::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Some(Ending::AwaitingApproval),
                next = self.control.rx.recv() => next,
            };
            let Some(interjection) = next else {
                return Some(Ending::AwaitingApproval);
            };
            if let Some(Directive::Reject) = self.apply(interjection) {
                return Some(Ending::Rejected);
            }
        }
        info!(session_id = %self.state.session_id, "Strategy approved by user");
        None
    }

    /// The explainer always gets the last word, falling back to the template.
    async fn narrate(&mut self) {
        let orch = self.orch;
        let agent = &orch.agents.explainer;
        let outcome = tokio::time::timeout(orch.agent_timeout(), agent.contribute(&self.state))
            .await
            .unwrap_or_else(|_| Err(AgentError::Timeout(orch.config.agent_timeout_seconds)));
        let contribution = outcome.unwrap_or_else(|e| {
            warn!(agent = %agent.name(), error = %e, "Explainer failed, using template");
            Contribution::new(
                EXPLAINER_AGENT,
                self.state.round_number(),
                ContributionContent::Explanation {
                    text: explain(&ExplanationRecord::from_state(&self.state)),
                },
            )
        });
        self.tallies.entry(agent.role()).or_default().contributions += 1;
        if let Err(e) = self.record(contribution).await {
            warn!(error = %e, "Explanation not recorded");
        }
    }

    async fn conclude(&mut self, ending: Ending) -> AnalysisResult {
        let (status, message) = match &ending {
            Ending::Completed => {
                let filled = self
                    .state
                    .execution_reports()
                    .iter()
                    .filter(|r| r.status.is_filled())
                    .count();
                let message = if filled == 0 {
                    "Analysis completed".to_string()
                } else {
                    format!("Analysis completed; {filled} order(s) filled")
                };
                (ResultStatus::Completed, message)
            }
            Ending::AwaitingApproval => (
                ResultStatus::AwaitingApproval,
                "Strategy requires your approval before execution".to_string(),
            ),
            Ending::Rejected => (
                ResultStatus::Rejected,
                "Strategy rejected by user".to_string(),
            ),
            Ending::Cancelled => (ResultStatus::Cancelled, "Session cancelled".to_string()),
            Ending::Halted(reason) => (
                ResultStatus::Error,
                format!("Trade execution halted: {reason}"),
            ),
            Ending::Failed(e) => (ResultStatus::Error, e.public_message()),
        };

        let final_status = status.final_session_status();
        if let Err(e) = self.transition(final_status, Some(message.clone())).await {
            warn!(error = %e, "Forcing terminal status");
            self.state.status = final_status;
        }

        let explanation = self.state.transcript().iter().rev().find_map(|c| match &c.content {
            ContributionContent::Explanation { text } => Some(text.clone()),
            _ => None,
        });

        AnalysisResult {
            id: Uuid::new_v4(),
            schema_version: OUTPUT_SCHEMA_VERSION,
            session_id: self.state.session_id,
            status,
            message,
            final_status: self.state.status,
            strategy: self.state.proposal.clone(),
            approval_required: self.state.approval_required,
            rounds_completed: self.state.round_number(),
            transcript: self.state.transcript().to_vec(),
            execution_reports: self.state.execution_reports(),
            explanation,
            agent_reports: self.agent_reports(),
            processing_time_ms: self.started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    fn agent_reports(&self) -> Vec<AgentReport> {
        self.orch
            .agents
            .all()
            .iter()
            .map(|agent| {
                let tally = self.tallies.get(&agent.role());
                AgentReport {
                    agent_name: agent.name().to_string(),
                    role: agent.role(),
                    contributions: tally.map_or(0, |t| t.contributions),
                    abstentions: tally.map_or(0, |t| t.abstentions),
                    elapsed_ms: tally.map_or(0, |t| t.elapsed.as_millis() as u64),
                }
            })
            .collect()
    }

    async fn persist(&self, result: &AnalysisResult) {
        let Some(store) = &self.orch.store else {
            return;
        };
        if let Err(e) = store.save_result(result).await {
            warn!(session_id = %result.session_id, error = %e, "Failed to persist result");
        }
        if let Some(strategy) = &result.strategy {
            if let Err(e) = store.save_strategy(strategy).await {
                warn!(strategy_id = %strategy.id, error = %e, "Failed to persist strategy");
            }
        }
    }

    async fn announce(&self, topic: &str, body: MessageBody) {
        self.announce_from(ORCHESTRATOR, topic, body).await;
    }

    async fn announce_from(&self, from: &str, topic: &str, body: MessageBody) {
        let importance = match &body {
            MessageBody::Alert(_) => Importance::High,
            _ => Importance::Medium,
        };
        let message = AgentMessage::new(from, body).with_importance(importance);
        if let Err(e) = self.orch.bus.publish(topic, message).await {
            warn!(topic, error = %e, "Publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_models::{Portfolio, RiskTolerance, UserProfile};
    use rust_decimal_macros::dec;

    fn request(cash: Decimal) -> AnalysisRequest {
        AnalysisRequest {
            portfolio: Portfolio {
                id: Uuid::new_v4(),
                cash,
                holdings: vec![],
            },
            user_profile: UserProfile {
                user_id: "u-1".to_string(),
                risk_tolerance: RiskTolerance::Moderate,
                investment_horizon_years: None,
                require_user_approval: None,
            },
        }
    }

    #[test]
    fn negative_cash_is_rejected() {
        assert!(validate_request(&request(dec!(-1))).is_err());
        assert!(validate_request(&request(dec!(0))).is_ok());
    }
}
