use std::sync::Arc;

use async_trait::async_trait;
use council_models::{AgentMessage, WsEnvelope};
use tokio::sync::broadcast;

use crate::bus::{topics, MessageBus, MessageHandler};
use crate::error::AgentError;

/// Fan-out of envelopes to UI observers.
///
/// Fire-and-forget: sending with no observers is not an error, and an
/// observer that falls more than `capacity` frames behind loses the oldest
/// ones instead of blocking the session.
#[derive(Clone)]
pub struct WsRelay {
    tx: broadcast::Sender<WsEnvelope>,
}

impl WsRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of observers the envelope was queued for.
    pub fn broadcast(&self, envelope: WsEnvelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEnvelope> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Bus handler that mirrors bus traffic onto the relay.
pub struct RelayForwarder {
    relay: WsRelay,
}

impl RelayForwarder {
    pub fn new(relay: WsRelay) -> Self {
        Self { relay }
    }

    /// Subscribe a forwarder to every well-known topic.
    pub fn attach(bus: &MessageBus, relay: WsRelay) {
        let forwarder: Arc<dyn MessageHandler> = Arc::new(Self::new(relay));
        for topic in topics::WELL_KNOWN {
            bus.subscribe(topic, Arc::clone(&forwarder));
        }
    }
}

#[async_trait]
impl MessageHandler for RelayForwarder {
    fn handler_id(&self) -> &str {
        "relay_forwarder"
    }

    async fn handle(&self, _topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError> {
        self.relay.broadcast(WsEnvelope::from(message.as_ref()));
        Ok(())
    }
}
