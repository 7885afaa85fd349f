//! Fan-out of session lifecycle events to realtime observers.
//!
//! Events are published by the registry while the originating session's lock is
//! held and after the new state is committed, so per-session delivery order matches
//! application order and an observer never sees a state `get`/`list` cannot confirm.
//!
//! Backpressure: every subscriber reads from a shared bounded ring. Publishing never
//! blocks; a subscriber that falls more than `capacity` events behind loses the
//! oldest ones and gets a [`Delivery::Lagged`] notice, after which it must resync
//! with a full session list.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{SessionId, SessionSummary};

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The host left through the leave endpoint.
    HostLeft,
    /// The host deleted the session.
    HostTeardown,
    /// No heartbeat within the expiry threshold.
    Expired,
    /// Dropped by the service itself.
    Removed,
}

/// Session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionCreated {
        revision: u64,
        session: SessionSummary,
    },
    SessionUpdated {
        revision: u64,
        session: SessionSummary,
    },
    SessionClosed {
        session_id: SessionId,
        revision: u64,
        reason: CloseReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::SessionCreated { session, .. } => session.id,
            SessionEvent::SessionUpdated { session, .. } => session.id,
            SessionEvent::SessionClosed { session_id, .. } => *session_id,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            SessionEvent::SessionCreated { revision, .. }
            | SessionEvent::SessionUpdated { revision, .. }
            | SessionEvent::SessionClosed { revision, .. } => *revision,
        }
    }
}

/// What a subscriber receives next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(SessionEvent),
    /// The subscriber fell behind and `missed` oldest events were dropped.
    Lagged { missed: u64 },
    /// The notifier is gone.
    Closed,
}

/// Broadcasts session events to every subscriber.
#[derive(Debug)]
pub struct RealtimeNotifier {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl RealtimeNotifier {
    /// Create a notifier whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Deliver an event to all current subscribers without waiting on any of them.
    pub fn publish(&self, event: SessionEvent) {
        let session_id = event.session_id();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(%session_id, receivers, "Published session event");
            }
            Err(_) => {
                tracing::trace!(%session_id, "No subscribers for session event");
            }
        }
    }

    /// Register a new observer. Dropping the subscription deregisters it.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RealtimeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// One observer's ordered view of the event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Delivery {
        match self.rx.recv().await {
            Ok(event) => Delivery::Event(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Delivery::Lagged { missed },
            Err(broadcast::error::RecvError::Closed) => Delivery::Closed,
        }
    }

    /// Next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(Delivery::Lagged { missed }),
            Err(broadcast::error::TryRecvError::Closed) => Some(Delivery::Closed),
            Err(broadcast::error::TryRecvError::Empty) => None,
        }
    }
}
