//! Host liveness tracking and expiry of silent sessions.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::{CoordinatorError, Result};
use super::notifier::CloseReason;
use super::registry::{Outcome, SessionRegistry};
use super::types::SessionId;

/// Expected interval between host heartbeats in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Missed intervals tolerated before a session expires.
pub const DEFAULT_EXPIRY_MULTIPLIER: u32 = 3;

/// Interval between sweeps in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Liveness policy.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub expiry_multiplier: u32,
    pub sweep_interval: Duration,
}

impl HeartbeatPolicy {
    /// Silence after which a session is expired.
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.expiry_multiplier)
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            expiry_multiplier: DEFAULT_EXPIRY_MULTIPLIER,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions whose heartbeat looked stale.
    pub examined: usize,
    pub expired: Vec<SessionId>,
    /// Sessions that could not be checked this pass.
    pub failed: Vec<SessionId>,
}

/// Records heartbeats and expires sessions that stop sending them.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    registry: Arc<SessionRegistry>,
    policy: HeartbeatPolicy,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<SessionRegistry>, policy: HeartbeatPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> HeartbeatPolicy {
        self.policy
    }

    /// Record a host heartbeat.
    pub async fn heartbeat(&self, session_id: SessionId, host_token: &str) -> Result<DateTime<Utc>> {
        let result = self
            .registry
            .mutate(session_id, |session, now| {
                if !session.host_token_matches(host_token) {
                    return Err(CoordinatorError::Unauthorized);
                }
                session.last_heartbeat = now;
                Ok(Outcome::Quiet(now))
            })
            .await;

        if let Err(e) = &result {
            tracing::debug!(%session_id, "Heartbeat rejected: {}", e);
        }
        result
    }

    /// Expire every session whose last heartbeat is older than the timeout.
    ///
    /// A failure on one session is logged and the pass continues.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.registry.clock().now();
        let Some(cutoff) = chrono::Duration::from_std(self.policy.timeout())
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return SweepReport::default();
        };

        let candidates = self.registry.stale_candidates(cutoff).await;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for session_id in candidates {
            match self.expire_if_stale(session_id, cutoff).await {
                Ok(true) => report.expired.push(session_id),
                Ok(false) => {}
                // Closed by someone else since the candidate scan.
                Err(CoordinatorError::SessionNotFound(_)) => {}
                Err(e) => {
                    tracing::error!(%session_id, "Failed to check session liveness: {}", e);
                    report.failed.push(session_id);
                }
            }
        }

        if !report.expired.is_empty() {
            tracing::info!(expired = report.expired.len(), "Expired stale sessions");
        }
        report
    }

    async fn expire_if_stale(&self, session_id: SessionId, cutoff: DateTime<Utc>) -> Result<bool> {
        self.registry
            .mutate(session_id, |session, _| {
                // A heartbeat may have landed after the candidate scan.
                if session.last_heartbeat >= cutoff {
                    return Ok(Outcome::Quiet(false));
                }
                tracing::info!(
                    %session_id,
                    last_heartbeat = %session.last_heartbeat,
                    "Session missed its heartbeats"
                );
                Ok(Outcome::Closed(true, CloseReason::Expired))
            })
            .await
    }

    /// Run [`sweep`](Self::sweep) on the policy's interval until shut down.
    pub fn spawn(self: Arc<Self>) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.policy.sweep_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            tracing::info!(interval_secs = period.as_secs(), "Heartbeat sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        tracing::trace!(?report, "Sweep finished");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Heartbeat sweeper stopped");
        });

        SweepHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to the background sweep task.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Heartbeat sweeper panicked: {}", e);
        }
    }
}
