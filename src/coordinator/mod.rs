//! Session coordination: registry, joins, heartbeats and realtime events.
//!
//! All state is in memory and owned by a single [`SessionRegistry`]; the other
//! components hold an `Arc` to it.

pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod join;
pub mod notifier;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoordinatorError, Result};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPolicy, SweepHandle, SweepReport};
pub use join::{JoinBroker, JoinOutcome, JoinRequest, LeaveOutcome};
pub use notifier::{CloseReason, Delivery, RealtimeNotifier, SessionEvent, Subscription};
pub use registry::{
    CreatedSession, RegistryLimits, SessionFilter, SessionPatch, SessionRegistry, SessionSpec,
};
pub use types::{
    Capacity, ConnectivityCandidate, GameMode, Member, PhysicsMode, PlayerIdentity, RaceStatus,
    Role, RoomDescriptor, Session, SessionId, SessionSnapshot, SessionState, SessionSummary,
};

use std::time::Duration;

/// Coordinator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub limits: RegistryLimits,
    pub heartbeat: HeartbeatPolicy,
    /// Per-subscriber event queue depth.
    pub queue_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            limits: RegistryLimits::default(),
            heartbeat: HeartbeatPolicy::default(),
            queue_capacity: notifier::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CoordinatorSettings {
    /// Create settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expiry threshold for silent hosts.
    pub fn session_timeout(&self) -> Duration {
        self.heartbeat.timeout()
    }
}
