//! End-to-end deliberation scenarios.
//!
//! Each test wires the standard council to scripted collaborators (offline
//! LLM, scripted broker, demo quotes, in-memory store) and drives a full
//! session through the orchestrator.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use council_agents::agents::{MarketAgent, RiskAgent, StrategyAgent, RISK_AGENT, STRATEGY_AGENT};
use council_agents::test_support::{
    cash_portfolio, concentrated_portfolio, profile, request, test_config, BrokerScript,
    FailingAgent, ScriptedLlm, ScriptedMarketData, TestHarness,
};
use council_agents::{topics, Agent, AgentError, MessageBus, MessageHandler, SessionHandle};
use council_models::{
    AgentMessage, AgentRole, ContributionContent, DeliberationState, InterjectionAction,
    MessageBody, OrderStatus, ResultStatus, RiskTolerance, SessionStatus, SystemEvent, TradeSide,
    UserInterjection,
};
use rust_decimal_macros::dec;

/// Records every status transition published on `system_event`.
#[derive(Default)]
struct StatusRecorder {
    seen: Mutex<Vec<SessionStatus>>,
}

impl StatusRecorder {
    fn statuses(&self) -> Vec<SessionStatus> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for StatusRecorder {
    fn handler_id(&self) -> &str {
        "status_recorder"
    }

    async fn handle(&self, _topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError> {
        if let MessageBody::SystemEvent(SystemEvent::StatusChanged { to, .. }) = &message.body {
            self.seen.lock().unwrap().push(*to);
        }
        Ok(())
    }
}

enum Reaction {
    Cancel(SessionHandle),
    Publish(Weak<MessageBus>, UserInterjection),
    Send(SessionHandle, UserInterjection),
}

/// Reacts to a matching system event from inside the bus, so the reaction
/// lands before the orchestrator continues.
struct Reactor {
    trigger: fn(&SystemEvent) -> bool,
    reaction: Reaction,
}

#[async_trait]
impl MessageHandler for Reactor {
    fn handler_id(&self) -> &str {
        "reactor"
    }

    async fn handle(&self, _topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError> {
        let MessageBody::SystemEvent(event) = &message.body else {
            return Ok(());
        };
        if !(self.trigger)(event) {
            return Ok(());
        }
        match &self.reaction {
            Reaction::Cancel(handle) => handle.cancel(),
            Reaction::Send(handle, interjection) => handle.send(interjection.clone()).await?,
            Reaction::Publish(bus, interjection) => {
                if let Some(bus) = bus.upgrade() {
                    bus.publish(
                        topics::USER_INPUT,
                        AgentMessage::new("user", MessageBody::UserInput(interjection.clone())),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

fn entered_paused(event: &SystemEvent) -> bool {
    matches!(
        event,
        SystemEvent::StatusChanged {
            to: SessionStatus::Paused,
            ..
        }
    )
}

fn first_round_started(event: &SystemEvent) -> bool {
    matches!(event, SystemEvent::RoundStarted { round: 1, .. })
}

// ============================================================
// Scenario A: all cash, moderate
// Expected: model portfolio, three buys, accepted in round 1
// ============================================================

#[tokio::test]
async fn scenario_all_cash_moderate() {
    let harness = TestHarness::standard().unwrap();
    let recorder = Arc::new(StatusRecorder::default());
    harness
        .ctx
        .bus
        .subscribe(topics::SYSTEM_EVENT, Arc::clone(&recorder) as Arc<dyn MessageHandler>);
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.final_status, SessionStatus::Stopped);
    assert_eq!(result.rounds_completed, 1);
    assert!(!result.approval_required);

    let strategy = result.strategy.as_ref().unwrap();
    assert_eq!(strategy.weight("VTI"), dec!(45));
    assert_eq!(strategy.weight("VXUS"), dec!(20));
    assert_eq!(strategy.weight("BND"), dec!(30));
    assert_eq!(strategy.cash_weight(), dec!(5));
    assert_eq!(strategy.recommended_trades.len(), 3);
    assert!(strategy
        .recommended_trades
        .iter()
        .all(|t| t.side == TradeSide::Buy));

    assert_eq!(harness.broker.orders().len(), 3);
    assert_eq!(result.execution_reports.len(), 3);
    assert!(result
        .execution_reports
        .iter()
        .all(|r| r.status == OrderStatus::Filled));
    assert!(result.explanation.as_deref().is_some_and(|t| !t.is_empty()));

    assert_eq!(
        recorder.statuses(),
        vec![
            SessionStatus::Initializing,
            SessionStatus::Analysis,
            SessionStatus::Deliberation,
            SessionStatus::Execution,
            SessionStatus::Stopped,
        ]
    );
}

// ============================================================
// Scenario B: 76% in one stock, moderate
// Expected: position trimmed to the 25% limit after one revision
// ============================================================

#[tokio::test]
async fn scenario_concentrated_moderate() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let portfolio = concentrated_portfolio("AAPL", dec!(190), dec!(76), dec!(100000));

    let result = orchestrator
        .run(request(portfolio, RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.rounds_completed, 2);
    let strategy = result.strategy.as_ref().unwrap();
    assert!(strategy.weight("AAPL") < dec!(76));
    assert_eq!(strategy.weight("AAPL"), dec!(25));
    assert_eq!(strategy.revision, 1);

    let first = &strategy.recommended_trades[0];
    assert_eq!(first.symbol, "AAPL");
    assert_eq!(first.side, TradeSide::Sell);
    assert_eq!(harness.broker.orders()[0].symbol, "AAPL");

    let verdicts: Vec<_> = result
        .transcript
        .iter()
        .filter_map(|c| c.verdict())
        .collect();
    assert_eq!(verdicts.len(), 2);
}

// ============================================================
// Scenario C: 100% in one stock, conservative, no cash
// Expected: position under 60%, cash floor restored
// ============================================================

#[tokio::test]
async fn scenario_single_stock_conservative() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let portfolio = concentrated_portfolio("TSLA", dec!(175.50), dec!(100), dec!(100000));

    let result = orchestrator
        .run(request(portfolio, RiskTolerance::Conservative))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    let strategy = result.strategy.as_ref().unwrap();
    assert!(strategy.weight("TSLA") < dec!(60));
    assert_eq!(strategy.weight("TSLA"), dec!(15));
    assert!(strategy.cash_weight() >= dec!(5));

    let sell = strategy
        .recommended_trades
        .iter()
        .find(|t| t.symbol == "TSLA")
        .unwrap();
    assert_eq!(sell.side, TradeSide::Sell);
}

// ============================================================
// Scenario D: LLM always fails
// Expected: deterministic explanation, session stopped
// ============================================================

#[tokio::test]
async fn scenario_llm_always_fails() {
    let harness =
        TestHarness::new(test_config(), ScriptedLlm::flaky(), BrokerScript::FillAll).unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(50000)), RiskTolerance::Aggressive))
        .await
        .unwrap();

    assert_eq!(result.final_status, SessionStatus::Stopped);
    assert_eq!(result.status, ResultStatus::Completed);
    // Market outlook and explanation both tried the LLM first.
    assert!(harness.llm.calls() >= 2);
    let explanation = result.explanation.unwrap();
    assert!(explanation.contains("aggressive"));
    assert!(explanation.contains("accepted the plan"));
}

#[tokio::test]
async fn llm_outage_without_demo_mode_fails_initialization() {
    let mut config = test_config();
    config.llm.demo_mode = false;
    let harness = TestHarness::new(config, ScriptedLlm::failing(), BrokerScript::FillAll).unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(10000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.final_status, SessionStatus::Error);
    assert_eq!(result.message, "The advisory agents could not be started");
    assert!(harness.broker.orders().is_empty());
}

// ============================================================
// Scenario E: broker rejects
// Expected: session error, no further orders
// ============================================================

#[tokio::test]
async fn scenario_broker_rejects() {
    let harness =
        TestHarness::new(test_config(), ScriptedLlm::failing(), BrokerScript::RejectAll).unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.final_status, SessionStatus::Error);
    assert_eq!(harness.broker.orders().len(), 1);
    assert_eq!(result.execution_reports.len(), 1);
    assert_eq!(result.execution_reports[0].status, OrderStatus::Rejected);
    assert!(result.message.starts_with("Trade execution halted"));
    assert!(result.message.contains("rejected by the broker"));
    assert!(!result.message.contains("scripted rejection"));
}

#[tokio::test]
async fn partial_fill_reports_completed_orders() {
    let harness = TestHarness::new(
        test_config(),
        ScriptedLlm::failing(),
        BrokerScript::RejectAfter(1),
    )
    .unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(harness.broker.orders().len(), 2);
    let statuses: Vec<_> = result.execution_reports.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![OrderStatus::Filled, OrderStatus::Rejected]);
}

#[tokio::test]
async fn unfilled_order_halts_execution() {
    let harness =
        TestHarness::new(test_config(), ScriptedLlm::failing(), BrokerScript::LeaveOpen).unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(harness.broker.orders().len(), 1);
    assert_eq!(result.execution_reports[0].status, OrderStatus::Accepted);
}

#[tokio::test]
async fn lost_submission_is_reported_as_unknown() {
    let harness =
        TestHarness::new(test_config(), ScriptedLlm::failing(), BrokerScript::Unresponsive)
            .unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(harness.broker.orders().len(), 1);
    assert_eq!(result.execution_reports.len(), 1);
    assert_eq!(result.execution_reports[0].status, OrderStatus::Unknown);
    assert!(result.message.contains("outcome is unknown"));
    assert!(!result.message.contains("rejected"));
}

// ============================================================
// Interjections
// ============================================================

#[tokio::test]
async fn pause_then_reject_stops_without_trading() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();

    let reactor: Arc<dyn MessageHandler> = Arc::new(Reactor {
        trigger: entered_paused,
        reaction: Reaction::Publish(
            Arc::downgrade(&harness.ctx.bus),
            UserInterjection::new(handle.session_id(), InterjectionAction::Reject),
        ),
    });
    harness.ctx.bus.subscribe(topics::SYSTEM_EVENT, reactor);

    handle.pause().await.unwrap();
    let result = orchestrator
        .run_with(
            request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate),
            control,
        )
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Rejected);
    assert_eq!(result.final_status, SessionStatus::Stopped);
    assert_eq!(result.rounds_completed, 0);
    assert!(harness.broker.orders().is_empty());
    assert!(result.execution_reports.is_empty());
}

#[tokio::test]
async fn comment_resumes_a_paused_session() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();

    let reactor: Arc<dyn MessageHandler> = Arc::new(Reactor {
        trigger: entered_paused,
        reaction: Reaction::Send(
            handle.clone(),
            UserInterjection::comment(handle.session_id(), "keep some bonds"),
        ),
    });
    harness.ctx.bus.subscribe(topics::SYSTEM_EVENT, reactor);

    handle.pause().await.unwrap();
    let result = orchestrator
        .run_with(
            request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate),
            control,
        )
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    assert!(result.explanation.unwrap().contains("keep some bonds"));
}

#[tokio::test]
async fn adjust_risk_redrafts_for_new_tolerance() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();

    handle.adjust_risk(RiskTolerance::Conservative).await.unwrap();
    let result = orchestrator
        .run_with(
            request(cash_portfolio(dec!(100000)), RiskTolerance::Aggressive),
            control,
        )
        .await
        .unwrap();

    let strategy = result.strategy.unwrap();
    assert_eq!(strategy.risk_tolerance, RiskTolerance::Conservative);
    assert_eq!(strategy.weight("BND"), dec!(50));
}

#[tokio::test]
async fn cancellation_is_honoured_between_rounds() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();

    let reactor: Arc<dyn MessageHandler> = Arc::new(Reactor {
        trigger: first_round_started,
        reaction: Reaction::Cancel(handle.clone()),
    });
    harness.ctx.bus.subscribe(topics::SYSTEM_EVENT, reactor);

    // Needs two rounds, so the cancel lands between them.
    let portfolio = concentrated_portfolio("AAPL", dec!(190), dec!(76), dec!(100000));
    let result = orchestrator
        .run_with(request(portfolio, RiskTolerance::Moderate), control)
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Cancelled);
    assert_eq!(result.final_status, SessionStatus::Stopped);
    assert_eq!(result.rounds_completed, 1);
    assert!(result.explanation.is_none());
    assert!(harness.broker.orders().is_empty());
    // Round 1 ran to completion: critique plus revision.
    assert!(result
        .transcript
        .iter()
        .any(|c| c.round_number == 1 && c.agent_name == STRATEGY_AGENT));
}

#[tokio::test]
async fn unrun_session_stops_accepting_interjections_once_dropped() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();
    drop(control);

    let late = AgentMessage::new(
        "user",
        MessageBody::UserInput(UserInterjection::new(
            handle.session_id(),
            InterjectionAction::Approve,
        )),
    );
    let report = harness.ctx.bus.publish(topics::USER_INPUT, late).await.unwrap();
    assert_eq!(report.failed, 0);
    assert!(harness.ctx.bus.failures().is_empty());
}

#[tokio::test]
async fn dropped_orchestrators_leave_the_bus() {
    let harness = TestHarness::standard().unwrap();
    let baseline = harness.ctx.bus.subscriber_count(topics::USER_INPUT);

    let first = harness.orchestrator();
    let second = harness.orchestrator();
    assert_eq!(harness.ctx.bus.subscriber_count(topics::USER_INPUT), baseline + 2);

    drop(first);
    assert_eq!(harness.ctx.bus.subscriber_count(topics::USER_INPUT), baseline + 1);
    drop(second);
    assert_eq!(harness.ctx.bus.subscriber_count(topics::USER_INPUT), baseline);
}

// ============================================================
// Abstentions
// ============================================================

#[tokio::test]
async fn three_consecutive_abstentions_escalate() {
    let harness = TestHarness::standard().unwrap();
    let failing = Arc::new(FailingAgent::new(RISK_AGENT, AgentRole::Risk));
    let mut agents = harness.agents();
    agents.risk = Arc::clone(&failing) as Arc<dyn Agent>;
    let orchestrator = harness.orchestrator_with(agents);

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(failing.calls(), 3);
    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.final_status, SessionStatus::Error);
    assert!(result.message.contains("abstained 3 times"));
    assert!(harness.broker.orders().is_empty());

    let risk = result
        .agent_reports
        .iter()
        .find(|r| r.role == AgentRole::Risk)
        .unwrap();
    assert_eq!(risk.abstentions, 3);
    assert_eq!(risk.contributions, 0);
    // The explainer still has the last word.
    assert!(result.explanation.is_some());
}

#[tokio::test]
async fn strategy_that_never_proposes_escalates_during_analysis() {
    let harness = TestHarness::standard().unwrap();
    let failing = Arc::new(FailingAgent::new(STRATEGY_AGENT, AgentRole::Strategy));
    let mut agents = harness.agents();
    agents.strategy = Arc::clone(&failing) as Arc<dyn Agent>;
    let orchestrator = harness.orchestrator_with(agents);

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(failing.calls(), 3);
    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.rounds_completed, 0);
    assert!(result.strategy.is_none());
}

// ============================================================
// Approval gate and convergence
// ============================================================

#[tokio::test]
async fn approval_required_without_approval_waits() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let mut req = request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate);
    req.user_profile.require_user_approval = Some(true);

    let result = orchestrator.run(req).await.unwrap();

    assert_eq!(result.status, ResultStatus::AwaitingApproval);
    assert_eq!(result.final_status, SessionStatus::Stopped);
    assert!(result.approval_required);
    assert!(harness.broker.orders().is_empty());
    assert!(result.strategy.is_some());
}

#[tokio::test]
async fn approval_granted_executes() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();
    let mut req = request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate);
    req.user_profile.require_user_approval = Some(true);

    handle.approve().await.unwrap();
    let result = orchestrator.run_with(req, control).await.unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    assert!(!result.approval_required);
    assert_eq!(harness.broker.orders().len(), 3);
}

#[tokio::test]
async fn reject_at_the_gate() {
    let mut config = test_config();
    config.deliberation.require_user_approval = true;
    config.deliberation.approval_wait_seconds = 5;
    let harness = TestHarness::new(config, ScriptedLlm::failing(), BrokerScript::FillAll).unwrap();
    let orchestrator = harness.orchestrator();
    let (handle, control) = orchestrator.session();

    let reactor: Arc<dyn MessageHandler> = Arc::new(Reactor {
        trigger: |event| matches!(event, SystemEvent::AwaitingApproval { .. }),
        reaction: Reaction::Send(
            handle.clone(),
            UserInterjection::new(handle.session_id(), InterjectionAction::Reject),
        ),
    });
    harness.ctx.bus.subscribe(topics::SYSTEM_EVENT, reactor);

    let result = orchestrator
        .run_with(
            request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate),
            control,
        )
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Rejected);
    assert!(harness.broker.orders().is_empty());
}

#[tokio::test]
async fn convergence_timeout_requires_approval() {
    let mut config = test_config();
    config.deliberation.max_deliberation_rounds = 1;
    let harness = TestHarness::new(config, ScriptedLlm::failing(), BrokerScript::FillAll).unwrap();
    let orchestrator = harness.orchestrator();
    let portfolio = concentrated_portfolio("AAPL", dec!(190), dec!(76), dec!(100000));

    let result = orchestrator
        .run(request(portfolio, RiskTolerance::Moderate))
        .await
        .unwrap();

    assert_eq!(result.rounds_completed, 1);
    assert_eq!(result.status, ResultStatus::AwaitingApproval);
    assert!(result.approval_required);
    // The unaccepted first draft is returned as-is.
    let strategy = result.strategy.unwrap();
    assert_eq!(strategy.revision, 0);
    assert!(strategy.weight("AAPL") < dec!(76));
    assert!(harness.broker.orders().is_empty());
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn round_number_never_exceeds_max() {
    for max in 1..=4 {
        let mut config = test_config();
        config.deliberation.max_deliberation_rounds = max;
        let harness =
            TestHarness::new(config, ScriptedLlm::failing(), BrokerScript::FillAll).unwrap();
        let orchestrator = harness.orchestrator();
        let portfolio = concentrated_portfolio("TSLA", dec!(175.50), dec!(100), dec!(100000));

        let result = orchestrator
            .run(request(portfolio, RiskTolerance::Conservative))
            .await
            .unwrap();
        assert!(result.rounds_completed <= max);
        assert!(result.transcript.iter().all(|c| c.round_number <= max));
    }
}

#[tokio::test]
async fn contribute_is_idempotent_for_unchanged_state() {
    let harness = TestHarness::standard().unwrap();
    let market = MarketAgent::new(
        Arc::clone(&harness.market) as Arc<dyn council_agents::MarketDataSource>,
        Arc::clone(&harness.llm) as Arc<dyn council_agents::LlmClient>,
        harness.ctx.config.llm.clone(),
        &harness.ctx.config.market_data,
    );
    market.initialize().await.unwrap();

    let portfolio = concentrated_portfolio("AAPL", dec!(190), dec!(76), dec!(100000));
    let mut state = DeliberationState::new(portfolio, profile(RiskTolerance::Moderate), 3);
    let outlook = market.contribute(&state).await.unwrap();
    state.append(outlook).unwrap();

    let strategy = StrategyAgent::default();
    let first = strategy.contribute(&state).await.unwrap();
    let second = strategy.contribute(&state).await.unwrap();
    match (&first.content, &second.content) {
        (
            ContributionContent::Proposal { strategy: a },
            ContributionContent::Proposal { strategy: b },
        ) => {
            assert_eq!(a.target_allocation, b.target_allocation);
            assert_eq!(a.recommended_trades, b.recommended_trades);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.revision, b.revision);
        }
        other => panic!("expected proposals, got {other:?}"),
    }

    if let ContributionContent::Proposal { strategy } = &first.content {
        state.proposal = Some(strategy.clone());
    }
    let a = RiskAgent.contribute(&state).await.unwrap();
    let b = RiskAgent.contribute(&state).await.unwrap();
    assert_eq!(a.content, b.content);
}

#[tokio::test]
async fn result_and_strategy_are_persisted() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    let stored = harness
        .store
        .load_result(result.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, result);

    let strategy = result.strategy.as_ref().unwrap();
    let stored_strategy = harness
        .store
        .load_strategy(strategy.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&stored_strategy, strategy);
}

#[tokio::test]
async fn missing_and_stale_quotes_lower_confidence() {
    let market = ScriptedMarketData::demo().without("VXUS").with_stale("SPY");
    let harness = TestHarness::with_market(
        test_config(),
        ScriptedLlm::failing(),
        BrokerScript::FillAll,
        market,
    )
    .unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    let outlook = result
        .transcript
        .iter()
        .find_map(|c| match &c.content {
            ContributionContent::MarketOutlook(o) => Some(o.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(outlook.missing_symbols, vec!["VXUS".to_string()]);
    assert_eq!(outlook.stale_symbols, vec!["SPY".to_string()]);

    let strategy = result.strategy.unwrap();
    // 0.80 - 0.10 (VXUS unpriced) - 0.05 (stale)
    assert_eq!(strategy.confidence, dec!(0.65));
    assert!(strategy.recommended_trades.iter().all(|t| t.symbol != "VXUS"));
}

#[tokio::test]
async fn relay_observers_see_the_session() {
    let harness = TestHarness::standard().unwrap();
    let mut observer = harness.ctx.relay.subscribe();
    let orchestrator = harness.orchestrator();

    orchestrator
        .run(request(cash_portfolio(dec!(100000)), RiskTolerance::Moderate))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(envelope) = observer.try_recv() {
        kinds.push(envelope.kind);
    }
    assert!(kinds.iter().any(|k| k == "system_event"));
    assert!(kinds.iter().any(|k| k == "communication"));
    assert!(kinds.iter().any(|k| k == "trade_executed"));
}

#[tokio::test]
async fn malformed_request_is_an_error() {
    let harness = TestHarness::standard().unwrap();
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(request(cash_portfolio(dec!(-5)), RiskTolerance::Moderate))
        .await;
    assert!(matches!(result, Err(AgentError::InvalidState(_))));
}
