//! Authoritative in-memory store of active sessions.
//!
//! Every session lives behind its own async mutex. All mutation goes through
//! [`SessionRegistry::mutate`], which works on a copy of the session and commits it
//! only once the whole operation succeeded, then publishes the resulting event while
//! still holding the lock.
//!
//! Lock order is always session lock before map lock; nothing acquires a session
//! lock while holding the map lock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::clock::Clock;
use super::error::{CoordinatorError, Result};
use super::notifier::{CloseReason, RealtimeNotifier, SessionEvent};
use super::types::{
    hash_password, Capacity, ConnectivityCandidate, GameMode, Member, PlayerIdentity, RaceStatus,
    Role, RoomDescriptor, Session, SessionId, SessionSettings, SessionSnapshot, SessionState,
    SessionSummary,
};
use crate::tracks::ContentHash;

/// Default maximum pilots per session.
pub const DEFAULT_MAX_PILOTS: u32 = 6;

/// Default maximum spectators per session.
pub const DEFAULT_MAX_SPECTATORS: u32 = 15;

/// Default time to wait for a per-session lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

/// Capacity ceilings and lock policy.
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    /// Default and upper bound for `max_pilots`.
    pub max_pilots: u32,
    /// Default and upper bound for `max_spectators`.
    pub max_spectators: u32,
    pub lock_timeout: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_pilots: DEFAULT_MAX_PILOTS,
            max_spectators: DEFAULT_MAX_SPECTATORS,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

/// Host registration request.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub host: PlayerIdentity,
    pub host_candidates: Vec<ConnectivityCandidate>,
    pub room: RoomDescriptor,
    pub track_hash: Option<ContentHash>,
    pub track_size: u64,
    pub max_pilots: Option<u32>,
    pub max_spectators: Option<u32>,
    pub password: Option<String>,
    pub download_allowed: bool,
}

impl SessionSpec {
    /// Registration with defaults for everything but host and room.
    pub fn new(host: PlayerIdentity, room: RoomDescriptor) -> Self {
        Self {
            host,
            host_candidates: Vec::new(),
            room,
            track_hash: None,
            track_size: 0,
            max_pilots: None,
            max_spectators: None,
            password: None,
            download_allowed: true,
        }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    /// Secret the host presents for heartbeat, update and teardown.
    pub host_token: String,
    pub snapshot: SessionSnapshot,
}

/// Host edit of a live session. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub room_name: Option<String>,
    pub map_id: Option<String>,
    pub track_id: Option<String>,
    pub is_custom_track: Option<bool>,
    pub track_hash: Option<ContentHash>,
    pub track_size: Option<u64>,
    pub laps: Option<u8>,
    pub game_mode: Option<GameMode>,
    pub race_status: Option<RaceStatus>,
    pub download_allowed: Option<bool>,
}

/// Discovery filter.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub game_mode: Option<GameMode>,
    /// Only sessions with a free pilot seat.
    pub available_only: bool,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(mode) = self.game_mode {
            if session.room.game_mode != mode {
                return false;
            }
        }
        !self.available_only || session.capacity.has_pilot_slot()
    }
}

/// How a mutation should be committed.
#[derive(Debug)]
pub(crate) enum Outcome<R> {
    /// Commit without a revision bump or event (heartbeats, idempotent re-joins).
    Quiet(R),
    /// Commit, bump the revision and emit `SessionUpdated`.
    Updated(R),
    /// Commit, remove the session and emit `SessionClosed`.
    Closed(R, CloseReason),
}

struct SessionSlot {
    /// Mirror of `last_heartbeat` readable without the lock, for sweep candidate selection.
    heartbeat_ms: AtomicI64,
    session: Arc<Mutex<Session>>,
}

/// Session store shared by every coordinator component.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    notifier: Arc<RealtimeNotifier>,
    clock: Arc<dyn Clock>,
    limits: RegistryLimits,
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("heartbeat_ms", &self.heartbeat_ms.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(notifier: Arc<RealtimeNotifier>, clock: Arc<dyn Clock>, limits: RegistryLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            notifier,
            clock,
            limits,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &Arc<RealtimeNotifier> {
        &self.notifier
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Register a new session hosted by `spec.host`.
    pub async fn create(&self, spec: SessionSpec) -> Result<CreatedSession> {
        self.validate(&spec)?;

        let now = self.clock.now();
        let SessionSpec {
            host,
            host_candidates,
            mut room,
            track_hash,
            track_size,
            max_pilots,
            max_spectators,
            password,
            download_allowed,
        } = spec;

        if room.name.trim().is_empty() {
            room.name = format!("{}'s Room", display_name_or_id(&host));
        }

        let password_hash = password.filter(|p| !p.is_empty()).map(|p| hash_password(&p));
        let host_token = Uuid::new_v4().simple().to_string();

        let mut sessions = self.sessions.write().await;

        let mut id = Uuid::new_v4();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let session = Session {
            id,
            host: host.clone(),
            host_token: host_token.clone(),
            room,
            track_hash,
            track_size,
            capacity: Capacity::new(
                max_pilots.unwrap_or(self.limits.max_pilots),
                max_spectators.unwrap_or(self.limits.max_spectators),
            ),
            settings: SessionSettings {
                password_hash,
                download_allowed,
            },
            state: SessionState::Open,
            race_status: RaceStatus::Lobby,
            revision: 1,
            created_at: now,
            last_heartbeat: now,
            members: vec![Member {
                player: host,
                role: Role::Host,
                joined_at: now,
                candidates: host_candidates,
            }],
        };

        let snapshot = session.snapshot();
        let event = SessionEvent::SessionCreated {
            revision: session.revision,
            session: snapshot.summary.clone(),
        };

        sessions.insert(
            id,
            Arc::new(SessionSlot {
                heartbeat_ms: AtomicI64::new(now.timestamp_millis()),
                session: Arc::new(Mutex::new(session)),
            }),
        );
        self.notifier.publish(event);
        drop(sessions);

        tracing::info!(
            session_id = %id,
            host = %snapshot.host.player_id,
            room = %snapshot.summary.room.name,
            "Session created"
        );

        Ok(CreatedSession {
            session_id: id,
            host_token,
            snapshot,
        })
    }

    fn validate(&self, spec: &SessionSpec) -> Result<()> {
        if spec.host.player_id.trim().is_empty() {
            return Err(CoordinatorError::validation("host player_id is required"));
        }
        if spec.room.map_id.trim().is_empty() {
            return Err(CoordinatorError::validation("room map_id is required"));
        }
        if spec.room.laps == 0 {
            return Err(CoordinatorError::validation("laps must be positive"));
        }
        check_capacity("max_pilots", spec.max_pilots, self.limits.max_pilots)?;
        check_capacity("max_spectators", spec.max_spectators, self.limits.max_spectators)?;
        if spec.room.is_custom_track && spec.track_hash.is_none() {
            return Err(CoordinatorError::validation(
                "custom tracks require a content_hash",
            ));
        }
        Ok(())
    }

    /// Full view of a live session.
    pub async fn get(&self, id: SessionId) -> Result<SessionSnapshot> {
        let (_, guard) = self.lock_live(id).await?;
        Ok(guard.snapshot())
    }

    /// Live sessions matching `filter`, oldest first; ties broken by id.
    pub async fn list(&self, filter: &SessionFilter) -> Vec<SessionSummary> {
        let slots: Vec<(SessionId, Arc<SessionSlot>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            match tokio::time::timeout(self.limits.lock_timeout, slot.session.lock()).await {
                Ok(session) => {
                    if session.state.is_live() && filter.matches(&session) {
                        summaries.push(session.summary());
                    }
                }
                Err(_) => {
                    tracing::warn!(session_id = %id, "Skipping busy session in listing");
                }
            }
        }

        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Close a session without host credentials.
    pub async fn remove(&self, id: SessionId) -> Result<()> {
        self.mutate(id, |_, _| Ok(Outcome::Closed((), CloseReason::Removed)))
            .await
    }

    /// Host-only explicit teardown.
    pub async fn teardown(&self, id: SessionId, host_token: &str) -> Result<()> {
        self.mutate(id, |session, _| {
            if !session.host_token_matches(host_token) {
                return Err(CoordinatorError::Unauthorized);
            }
            Ok(Outcome::Closed((), CloseReason::HostTeardown))
        })
        .await
    }

    /// Host edit of room settings.
    pub async fn update(&self, id: SessionId, host_token: &str, patch: SessionPatch) -> Result<SessionSnapshot> {
        self.mutate(id, |session, _| {
            if !session.host_token_matches(host_token) {
                return Err(CoordinatorError::Unauthorized);
            }
            apply_patch(session, patch)?;
            let mut snapshot = session.snapshot();
            // The commit bumps the revision.
            snapshot.summary.revision += 1;
            Ok(Outcome::Updated(snapshot))
        })
        .await
    }

    /// Number of sessions currently stored.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids whose last heartbeat is older than `cutoff`, read without session locks.
    pub(crate) async fn stale_candidates(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.heartbeat_ms.load(Ordering::SeqCst) < cutoff_ms)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Run `f` against a copy of a live session under its lock and commit the result.
    ///
    /// `f` receives the copy and the current time. On error nothing is committed.
    pub(crate) async fn mutate<R, F>(&self, id: SessionId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session, DateTime<Utc>) -> Result<Outcome<R>>,
    {
        let (slot, mut guard) = self.lock_live(id).await?;
        let now = self.clock.now();

        let mut next = (*guard).clone();
        let outcome = f(&mut next, now)?;

        assert!(
            next.capacity.within_bounds(),
            "session {} capacity out of bounds: {:?}",
            id,
            next.capacity
        );

        let (result, event) = match outcome {
            Outcome::Quiet(result) => (result, None),
            Outcome::Updated(result) => {
                next.revision += 1;
                let event = SessionEvent::SessionUpdated {
                    revision: next.revision,
                    session: next.summary(),
                };
                (result, Some(event))
            }
            Outcome::Closed(result, reason) => {
                next.revision += 1;
                next.state = match reason {
                    CloseReason::Expired => SessionState::Expired,
                    CloseReason::HostLeft | CloseReason::HostTeardown | CloseReason::Removed => {
                        SessionState::Closed
                    }
                };
                self.sessions.write().await.remove(&id);
                tracing::info!(session_id = %id, ?reason, "Session closed");
                let event = SessionEvent::SessionClosed {
                    session_id: id,
                    revision: next.revision,
                    reason,
                };
                (result, Some(event))
            }
        };

        slot.heartbeat_ms
            .store(next.last_heartbeat.timestamp_millis(), Ordering::SeqCst);
        *guard = next;

        if let Some(event) = event {
            self.notifier.publish(event);
        }

        Ok(result)
    }

    /// Acquire the lock of a live session, bounded by the configured timeout.
    async fn lock_live(&self, id: SessionId) -> Result<(Arc<SessionSlot>, OwnedMutexGuard<Session>)> {
        let slot = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoordinatorError::SessionNotFound(id))?;

        let guard = tokio::time::timeout(self.limits.lock_timeout, Arc::clone(&slot.session).lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(session_id = %id, "Timed out waiting for session lock");
                CoordinatorError::LockTimeout(id)
            })?;

        // Removed while we waited.
        if !guard.state.is_live() {
            return Err(CoordinatorError::SessionNotFound(id));
        }

        Ok((slot, guard))
    }
}

fn check_capacity(field: &str, requested: Option<u32>, ceiling: u32) -> Result<()> {
    match requested {
        Some(0) => Err(CoordinatorError::validation(format!("{} must be positive", field))),
        Some(n) if n > ceiling => Err(CoordinatorError::validation(format!(
            "{} must not exceed {}",
            field, ceiling
        ))),
        _ => Ok(()),
    }
}

fn display_name_or_id(player: &PlayerIdentity) -> &str {
    if player.display_name.trim().is_empty() {
        &player.player_id
    } else {
        &player.display_name
    }
}

fn apply_patch(session: &mut Session, patch: SessionPatch) -> Result<()> {
    if let Some(name) = patch.room_name {
        if name.trim().is_empty() {
            return Err(CoordinatorError::validation("room name must not be empty"));
        }
        session.room.name = name;
    }
    if let Some(map_id) = patch.map_id {
        if map_id.trim().is_empty() {
            return Err(CoordinatorError::validation("room map_id is required"));
        }
        session.room.map_id = map_id;
    }
    if let Some(track_id) = patch.track_id {
        session.room.track_id = track_id;
        // A new track invalidates the old payload digest unless one is supplied.
        session.track_hash = None;
        session.track_size = 0;
    }
    if let Some(is_custom) = patch.is_custom_track {
        session.room.is_custom_track = is_custom;
    }
    if let Some(hash) = patch.track_hash {
        session.track_hash = Some(hash);
    }
    if let Some(size) = patch.track_size {
        session.track_size = size;
    }
    if let Some(laps) = patch.laps {
        if laps == 0 {
            return Err(CoordinatorError::validation("laps must be positive"));
        }
        session.room.laps = laps;
    }
    if let Some(mode) = patch.game_mode {
        session.room.game_mode = mode;
    }
    if let Some(status) = patch.race_status {
        session.race_status = status;
    }
    if let Some(allowed) = patch.download_allowed {
        session.settings.download_allowed = allowed;
    }

    if session.room.is_custom_track && session.track_hash.is_none() {
        return Err(CoordinatorError::validation(
            "custom tracks require a content_hash",
        ));
    }
    Ok(())
}

#[cfg(test)]
impl SessionRegistry {
    /// Take a session's lock and keep it until the guard drops.
    pub(crate) async fn hold_lock(&self, id: SessionId) -> OwnedMutexGuard<Session> {
        let slot = self.sessions.read().await.get(&id).cloned().unwrap();
        Arc::clone(&slot.session).lock_owned().await
    }
}
