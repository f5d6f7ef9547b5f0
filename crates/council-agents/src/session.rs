use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use council_models::{
    AgentMessage, InterjectionAction, MessageBody, RiskTolerance, UserInterjection,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::bus::MessageHandler;
use crate::error::{AgentError, BusError};

/// Interjections buffered per session before senders see back-pressure.
pub const INBOX_CAPACITY: usize = 32;

const USER_SENDER: &str = "user";

/// Caller side of a running session: cancel it or talk to it.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    tx: mpsc::Sender<UserInterjection>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: Uuid,
        cancel: CancellationToken,
        tx: mpsc::Sender<UserInterjection>,
    ) -> Self {
        Self {
            session_id,
            cancel,
            tx,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Takes effect at the next round boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver an interjection to this session. It is validated the same way
    /// the bus validates `user_input` messages.
    pub async fn send(&self, interjection: UserInterjection) -> Result<(), BusError> {
        if interjection.session_id != self.session_id {
            return Err(BusError::Closed(format!(
                "interjection addressed to session {}",
                interjection.session_id
            )));
        }
        AgentMessage::new(USER_SENDER, MessageBody::UserInput(interjection.clone())).validate()?;
        self.tx
            .send(interjection)
            .await
            .map_err(|_| BusError::Closed(format!("session {} has ended", self.session_id)))
    }

    pub async fn approve(&self) -> Result<(), BusError> {
        self.send(UserInterjection::new(self.session_id, InterjectionAction::Approve))
            .await
    }

    pub async fn reject(&self) -> Result<(), BusError> {
        self.send(UserInterjection::new(self.session_id, InterjectionAction::Reject))
            .await
    }

    pub async fn pause(&self) -> Result<(), BusError> {
        self.send(UserInterjection::new(self.session_id, InterjectionAction::Pause))
            .await
    }

    pub async fn comment(&self, text: impl Into<String>) -> Result<(), BusError> {
        self.send(UserInterjection::comment(self.session_id, text))
            .await
    }

    pub async fn adjust_risk(&self, tolerance: RiskTolerance) -> Result<(), BusError> {
        self.send(UserInterjection::adjust_risk(self.session_id, tolerance))
            .await
    }
}

/// Orchestrator side of a session, consumed by `run_with`.
///
/// Dropping it closes the session's inbox, whether or not it was ever run.
pub struct SessionControl {
    pub(crate) session_id: Uuid,
    pub(crate) cancel: CancellationToken,
    pub(crate) rx: mpsc::Receiver<UserInterjection>,
    router: Weak<InterjectionRouter>,
}

impl SessionControl {
    pub(crate) fn new(
        session_id: Uuid,
        cancel: CancellationToken,
        rx: mpsc::Receiver<UserInterjection>,
        router: Weak<InterjectionRouter>,
    ) -> Self {
        Self {
            session_id,
            cancel,
            rx,
            router,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Drop for SessionControl {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unregister(self.session_id);
        }
    }
}

/// Routes `user_input` bus messages to the inbox of the session they name.
///
/// Each router subscribes under its own id so that several orchestrators can
/// share one bus.
pub struct InterjectionRouter {
    id: String,
    inboxes: RwLock<HashMap<Uuid, mpsc::Sender<UserInterjection>>>,
}

impl Default for InterjectionRouter {
    fn default() -> Self {
        Self {
            id: format!("interjection_router:{}", Uuid::new_v4()),
            inboxes: RwLock::new(HashMap::new()),
        }
    }
}

impl InterjectionRouter {
    pub fn register(&self, session_id: Uuid, tx: mpsc::Sender<UserInterjection>) {
        self.inboxes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id, tx);
    }

    pub fn unregister(&self, session_id: Uuid) -> bool {
        self.inboxes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&session_id)
            .is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.inboxes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn route(&self, interjection: UserInterjection) -> Result<(), BusError> {
        let inboxes = self
            .inboxes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = inboxes.get(&interjection.session_id) else {
            debug!(session_id = %interjection.session_id, "Interjection for unknown session dropped");
            return Ok(());
        };
        tx.try_send(interjection).map_err(|e| match e {
            TrySendError::Full(i) => BusError::Closed(format!("session {} inbox is full", i.session_id)),
            TrySendError::Closed(i) => BusError::Closed(format!("session {} has ended", i.session_id)),
        })
    }
}

#[async_trait]
impl MessageHandler for InterjectionRouter {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, _topic: &str, message: Arc<AgentMessage>) -> Result<(), AgentError> {
        if let MessageBody::UserInput(interjection) = &message.body {
            self.route(interjection.clone())?;
        }
        Ok(())
    }
}
