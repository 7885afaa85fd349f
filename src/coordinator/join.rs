//! Join and leave flows.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::{CoordinatorError, Result};
use super::notifier::CloseReason;
use super::registry::{Outcome, SessionRegistry};
use super::types::{ConnectivityCandidate, PlayerIdentity, Role, Session, SessionId};
use crate::tracks::{
    IntegrityError, TrackAvailability, TrackCatalog, TrackDescriptor, TrackTransferCoordinator,
};

/// A player asking for a seat.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub player: PlayerIdentity,
    pub as_spectator: bool,
    pub password: Option<String>,
    /// Content hashes the joiner already holds.
    pub local_tracks: TrackCatalog,
    pub candidates: Vec<ConnectivityCandidate>,
}

impl JoinRequest {
    pub fn pilot(player: PlayerIdentity) -> Self {
        Self {
            player,
            as_spectator: false,
            password: None,
            local_tracks: TrackCatalog::new(),
            candidates: Vec::new(),
        }
    }

    pub fn spectator(player: PlayerIdentity) -> Self {
        Self {
            as_spectator: true,
            ..Self::pilot(player)
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_tracks(mut self, local_tracks: TrackCatalog) -> Self {
        self.local_tracks = local_tracks;
        self
    }
}

/// Everything a joiner needs to connect to the host.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session_id: SessionId,
    pub role: Role,
    pub host: PlayerIdentity,
    /// Host connectivity candidates.
    pub connectivity: Vec<ConnectivityCandidate>,
    pub track: TrackDescriptor,
    pub availability: TrackAvailability,
    /// The player was already seated; nothing changed.
    pub rejoined: bool,
    pub revision: u64,
}

/// What a leave did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// A pilot or spectator seat was released.
    Left(Role),
    /// The host left and the session is gone.
    SessionClosed,
    /// The player held no seat.
    NotMember,
}

/// Applies join and leave rules on top of the registry.
#[derive(Debug, Clone)]
pub struct JoinBroker {
    registry: Arc<SessionRegistry>,
    transfers: TrackTransferCoordinator,
}

impl JoinBroker {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            transfers: TrackTransferCoordinator::new(),
        }
    }

    /// Seat a player in a session.
    ///
    /// Checks run in order: session live, password, capacity, existing membership.
    /// A player already seated gets the existing membership back unchanged, as long
    /// as the requested role still has a free seat.
    pub async fn join(&self, session_id: SessionId, request: JoinRequest) -> Result<JoinOutcome> {
        if request.player.player_id.trim().is_empty() {
            return Err(CoordinatorError::validation("player_id is required"));
        }

        let transfers = self.transfers;
        let JoinRequest {
            player,
            as_spectator,
            password,
            local_tracks,
            candidates,
        } = request;
        let requested = Role::requested(as_spectator);
        let player_id = player.player_id.clone();

        let result = self
            .registry
            .mutate(session_id, move |session, now| {
                if !session.password_matches(password.as_deref()) {
                    return Err(CoordinatorError::InvalidPassword);
                }

                if !session.capacity.has_slot_for(requested) {
                    return Err(CoordinatorError::SessionFull(session.id));
                }

                if let Some(existing) = session.member(&player.player_id) {
                    if !existing.role.satisfies(requested) {
                        return Err(CoordinatorError::validation(format!(
                            "player is already seated as {:?}",
                            existing.role
                        )));
                    }
                    let role = existing.role;
                    let outcome = build_outcome(session, role, true, &transfers, &local_tracks, now);
                    return Ok(Outcome::Quiet(outcome));
                }

                session.admit(player, requested, candidates, now);
                let mut outcome = build_outcome(session, requested, false, &transfers, &local_tracks, now);
                // The commit bumps the revision.
                outcome.revision += 1;
                Ok(Outcome::Updated(outcome))
            })
            .await;

        match &result {
            Ok(outcome) if !outcome.rejoined => {
                tracing::info!(%session_id, player = %player_id, role = ?outcome.role, "Player joined");
            }
            Ok(_) => {
                tracing::debug!(%session_id, player = %player_id, "Player re-joined");
            }
            Err(e) => {
                tracing::debug!(%session_id, player = %player_id, "Join rejected: {}", e);
            }
        }

        result
    }

    /// Release a player's seat. The host leaving closes the session and requires
    /// the host token.
    pub async fn leave(
        &self,
        session_id: SessionId,
        player_id: &str,
        host_token: Option<&str>,
    ) -> Result<LeaveOutcome> {
        let outcome = self
            .registry
            .mutate(session_id, |session, _| {
                let Some(member) = session.member(player_id) else {
                    return Ok(Outcome::Quiet(LeaveOutcome::NotMember));
                };

                if member.role == Role::Host {
                    if !host_token.is_some_and(|t| session.host_token_matches(t)) {
                        return Err(CoordinatorError::Unauthorized);
                    }
                    return Ok(Outcome::Closed(LeaveOutcome::SessionClosed, CloseReason::HostLeft));
                }

                let role = member.role;
                session.release(player_id);
                Ok(Outcome::Updated(LeaveOutcome::Left(role)))
            })
            .await?;

        tracing::debug!(%session_id, player = %player_id, ?outcome, "Player left");
        Ok(outcome)
    }

    /// Issue a fresh track answer for a seated player, typically after a failed
    /// integrity check on a previous transfer.
    ///
    /// When the reported failure cannot be repaired because the host no longer
    /// serves the track, the failure is returned as an integrity error.
    pub async fn renegotiate_track(
        &self,
        session_id: SessionId,
        player_id: &str,
        local_tracks: &TrackCatalog,
        failure: Option<IntegrityError>,
    ) -> Result<TrackAvailability> {
        if let Some(reported) = &failure {
            tracing::warn!(%session_id, player = %player_id, "Track transfer failed: {}", reported);
        }

        let transfers = self.transfers;
        let availability = self
            .registry
            .mutate(session_id, |session, now| {
                if session.member(player_id).is_none() {
                    return Err(CoordinatorError::validation("player is not a member of this session"));
                }
                Ok(Outcome::Quiet(transfers.negotiate(session, local_tracks, now)))
            })
            .await?;

        match (failure, availability) {
            (Some(reported), TrackAvailability::Unavailable) => Err(reported.into()),
            (_, availability) => Ok(availability),
        }
    }
}

fn build_outcome(
    session: &Session,
    role: Role,
    rejoined: bool,
    transfers: &TrackTransferCoordinator,
    local_tracks: &TrackCatalog,
    now: DateTime<Utc>,
) -> JoinOutcome {
    JoinOutcome {
        session_id: session.id,
        role,
        host: session.host.clone(),
        connectivity: session.host_candidates().to_vec(),
        track: session.track_descriptor(),
        availability: transfers.negotiate(session, local_tracks, now),
        rejoined,
        revision: session.revision,
    }
}
