//! Direct messages to open screens
//!
//! Screens that are up register here and receive [`ScreenMessage`]s on their own
//! channel: the incoming-call screen is told to close when the call is answered or
//! declined elsewhere, and every screen hears about phase changes and the end of
//! the session. Subscribers whose receiver was dropped are pruned on the next send.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::platform::ScreenKind;
use crate::session::CallPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenMessage {
    /// Close the screen; the call moved on without it
    Close,
    PhaseChanged(CallPhase),
    SessionEnded,
}

pub type ScreenId = Uuid;

struct Subscriber {
    kind: ScreenKind,
    sender: mpsc::UnboundedSender<ScreenMessage>,
}

/// Registry of open screens
#[derive(Clone, Default)]
pub struct ScreenRegistry {
    subscribers: Arc<DashMap<ScreenId, Subscriber>>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open screen. Dropping the receiver unregisters it.
    pub fn subscribe(&self, kind: ScreenKind) -> (ScreenId, mpsc::UnboundedReceiver<ScreenMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.insert(id, Subscriber { kind, sender });
        debug!(screen = %kind, %id, "Screen subscribed");
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: &ScreenId) {
        if self.subscribers.remove(id).is_some() {
            debug!(%id, "Screen unsubscribed");
        }
    }

    /// Send to every screen of one kind
    pub fn send_to(&self, kind: ScreenKind, message: ScreenMessage) {
        self.deliver(|subscriber| subscriber.kind == kind, message);
    }

    /// Send to every screen
    pub fn broadcast(&self, message: ScreenMessage) {
        self.deliver(|_| true, message);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn deliver(&self, target: impl Fn(&Subscriber) -> bool, message: ScreenMessage) {
        self.subscribers.retain(|id, subscriber| {
            if !target(subscriber) {
                return !subscriber.sender.is_closed();
            }
            let delivered = subscriber.sender.send(message).is_ok();
            if !delivered {
                trace!(%id, "Pruning closed screen");
            }
            delivered
        });
    }
}

impl std::fmt::Debug for ScreenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenRegistry")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
