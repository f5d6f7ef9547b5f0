//! In-process publish/subscribe bus.
//!
//! Delivery is at-most-once with no replay. Subscribers of a topic receive
//! messages in subscription order; each handler runs in its own task under a
//! timeout, so one failing or slow handler is recorded and skipped without
//! affecting the others. A handler that overruns its timeout is detached,
//! not cancelled: it keeps running in the background and only its delivery
//! is counted as failed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use council_models::AgentMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AgentError, BusError};

/// Well-known topic names.
pub mod topics {
    pub const ALL: &str = "all";
    pub const SYSTEM_EVENT: &str = "system_event";
    pub const DELIBERATION: &str = "deliberation";
    pub const EXECUTE_TRADE: &str = "execute_trade";
    pub const TRADE_EXECUTED: &str = "trade_executed";
    pub const USER_INPUT: &str = "user_input";
    pub const EXPLANATION: &str = "explanation";
    pub const ALERT: &str = "alert";

    pub const WELL_KNOWN: [&str; 8] = [
        ALL,
        SYSTEM_EVENT,
        DELIBERATION,
        EXECUTE_TRADE,
        TRADE_EXECUTED,
        USER_INPUT,
        EXPLANATION,
        ALERT,
    ];
}

const FAILURE_LOG_CAPACITY: usize = 256;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable identity used to deduplicate subscriptions.
    fn handler_id(&self) -> &str;

    async fn handle(&self, topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: u64,
    pub topic: String,
    pub handler_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub topic: String,
    pub handler_id: String,
    pub message_id: Uuid,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub delivered: usize,
    pub failed: usize,
}

struct Registered {
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
}

pub struct MessageBus {
    subscribers: RwLock<HashMap<String, Vec<Registered>>>,
    failures: Mutex<VecDeque<DeliveryFailure>>,
    handler_timeout: Duration,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            failures: Mutex::new(VecDeque::with_capacity(FAILURE_LOG_CAPACITY)),
            handler_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` on `topic`. Subscribing the same handler id to the
    /// same topic again returns the existing subscription.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Subscription {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entries = subscribers.entry(topic.to_string()).or_default();

        if let Some(existing) = entries
            .iter()
            .find(|r| r.subscription.handler_id == handler.handler_id())
        {
            return existing.subscription.clone();
        }

        let subscription = Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
            handler_id: handler.handler_id().to_string(),
        };
        debug!(topic, handler = %subscription.handler_id, "Subscribed");
        entries.push(Registered {
            subscription: subscription.clone(),
            handler,
        });
        subscription
    }

    /// Returns whether the subscription was still active.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entries) = subscribers.get_mut(&subscription.topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| r.subscription.id != subscription.id);
        before != entries.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Validate `message` and deliver it to every current subscriber of `topic`.
    pub async fn publish(
        &self,
        topic: &str,
        message: AgentMessage,
    ) -> Result<DeliveryReport, BusError> {
        message.validate()?;
        let message = Arc::new(message);

        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(topic)
            .map(|entries| entries.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default();

        let mut report = DeliveryReport {
            topic: topic.to_string(),
            delivered: 0,
            failed: 0,
        };

        for handler in handlers {
            let handler_id = handler.handler_id().to_string();
            let task_topic = topic.to_string();
            let task_message = Arc::clone(&message);
            let mut task =
                tokio::spawn(async move { handler.handle(&task_topic, task_message).await });

            let reason = match tokio::time::timeout(self.handler_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Ok(Err(e))) => format!("handler error: {e}"),
                Ok(Err(join_err)) if join_err.is_panic() => "handler panicked".to_string(),
                Ok(Err(_)) => "handler task cancelled".to_string(),
                // Dropping the handle detaches the task so side effects already
                // in flight, such as an order submission, still complete.
                Err(_) => format!(
                    "handler timed out after {:?}, left running",
                    self.handler_timeout
                ),
            };

            report.failed += 1;
            self.record_failure(DeliveryFailure {
                topic: topic.to_string(),
                handler_id,
                message_id: message.id,
                reason,
                at: Utc::now(),
            });
        }

        Ok(report)
    }

    /// Publish on the synthetic [`topics::ALL`] topic.
    pub async fn broadcast(&self, message: AgentMessage) -> Result<DeliveryReport, BusError> {
        self.publish(topics::ALL, message).await
    }

    /// Most recent delivery failures, oldest first.
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn record_failure(&self, failure: DeliveryFailure) {
        warn!(
            topic = %failure.topic,
            handler = %failure.handler_id,
            message_id = %failure.message_id,
            reason = %failure.reason,
            "Message delivery failed"
        );
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failures.len() >= FAILURE_LOG_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(failure);
    }
}
