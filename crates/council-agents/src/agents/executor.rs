use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use council_models::{
    AgentMessage, AgentRole, Communication, Contribution, ContributionContent, DeliberationState,
    ExecutionReport, MessageBody, OrderStatus, RecommendedTrade,
};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{publish_weak, Agent};
use crate::broker::{BrokerClient, OrderRequest};
use crate::bus::{topics, MessageBus};
use crate::error::{AgentError, BrokerError};

pub const EXECUTOR_AGENT: &str = "executor";

/// Places the recommended orders, one at a time, exactly once each.
pub struct ExecutorAgent {
    broker: Arc<dyn BrokerClient>,
    bus: Weak<MessageBus>,
    ready: OnceCell<()>,
}

impl ExecutorAgent {
    pub fn new(broker: Arc<dyn BrokerClient>, bus: Weak<MessageBus>) -> Self {
        Self {
            broker,
            bus,
            ready: OnceCell::new(),
        }
    }

    async fn execute_one(
        &self,
        session_id: Uuid,
        client_order_id: String,
        trade: &RecommendedTrade,
    ) -> Result<ExecutionReport, BrokerError> {
        let order = OrderRequest::from_trade(client_order_id, trade);
        let ack = self.broker.submit_order(&order).await?;
        let report = ExecutionReport {
            session_id,
            order_id: ack.order_id,
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            status: ack.status,
            filled_price: ack.filled_price,
            submitted_at: Utc::now(),
        };
        info!(
            session_id = %session_id,
            order_id = %report.order_id,
            symbol = %report.symbol,
            status = report.status.as_str(),
            "Order submitted"
        );
        publish_weak(
            &self.bus,
            topics::TRADE_EXECUTED,
            AgentMessage::new(EXECUTOR_AGENT, MessageBody::TradeExecuted(report.clone())),
        )
        .await;
        Ok(report)
    }
}

/// Status to report for a submission the broker never acknowledged.
///
/// Only an explicit rejection proves the order does not exist. A transport
/// failure leaves its fate unknown.
fn failed_order_status(error: &BrokerError) -> (OrderStatus, &'static str) {
    match error {
        BrokerError::Rejected(_) => (OrderStatus::Rejected, "was rejected by the broker"),
        BrokerError::Unavailable(_) => (
            OrderStatus::Unknown,
            "outcome is unknown, reconcile with the broker before retrying",
        ),
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn name(&self) -> &str {
        EXECUTOR_AGENT
    }

    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }

    fn subscriptions(&self) -> Vec<&'static str> {
        vec![topics::EXECUTE_TRADE]
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.ready
            .get_or_try_init(|| async {
                self.broker.health_check().await.map_err(|e| {
                    AgentError::Initialization(format!("{EXECUTOR_AGENT}: broker unavailable: {e}"))
                })
            })
            .await?;
        Ok(())
    }

    /// Submit every recommended trade in order. Stops at the first broker
    /// error or unfilled order and reports why in `halted`.
    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError> {
        let proposal = state
            .proposal
            .as_ref()
            .ok_or_else(|| AgentError::InvalidState("no proposal to execute".to_string()))?;

        let mut reports = Vec::new();
        let mut halted = None;
        for (index, trade) in proposal.recommended_trades.iter().enumerate() {
            let client_order_id = format!("{}-{}", state.session_id, index + 1);
            match self
                .execute_one(state.session_id, client_order_id.clone(), trade)
                .await
            {
                Ok(report) => {
                    let status = report.status;
                    reports.push(report);
                    if status != OrderStatus::Filled {
                        halted = Some(format!("{} order {}", trade.symbol, status.as_str()));
                        break;
                    }
                }
                Err(e) => {
                    warn!(symbol = %trade.symbol, error = %e, "Order failed, halting execution");
                    let (status, reason) = failed_order_status(&e);
                    reports.push(ExecutionReport {
                        session_id: state.session_id,
                        order_id: client_order_id,
                        symbol: trade.symbol.clone(),
                        side: trade.side,
                        quantity: trade.quantity,
                        status,
                        filled_price: None,
                        submitted_at: Utc::now(),
                    });
                    halted = Some(format!("{} order {reason}", trade.symbol));
                    break;
                }
            }
        }

        Ok(Contribution::new(
            EXECUTOR_AGENT,
            state.round_number(),
            ContributionContent::Execution { reports, halted },
        ))
    }

    /// Ad-hoc trade requests arriving on `execute_trade`.
    async fn on_message(&self, _topic: &str, message: &AgentMessage) -> Result<(), AgentError> {
        let MessageBody::Communication(Communication::TradeRequest { session_id, trade }) =
            &message.body
        else {
            return Ok(());
        };
        let client_order_id = format!("{session_id}-{}", message.id);
        self.execute_one(*session_id, client_order_id, trade).await?;
        Ok(())
    }
}
