//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::{
    ConnectivityCandidate, GameMode, JoinOutcome, LeaveOutcome, PlayerIdentity, RaceStatus, Role,
    RoomDescriptor, SessionId, SessionPatch, SessionSnapshot, SessionSummary,
};
use crate::tracks::{ContentHash, IntegrityError, TrackAvailability, TrackCatalog, TrackDescriptor};

fn default_true() -> bool {
    true
}

/// `POST /sessions`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub host: PlayerIdentity,
    pub room: RoomDescriptor,
    #[serde(default)]
    pub track_hash: Option<ContentHash>,
    #[serde(default)]
    pub track_size: u64,
    #[serde(default)]
    pub max_pilots: Option<u32>,
    #[serde(default)]
    pub max_spectators: Option<u32>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub download_allowed: bool,
    /// Addresses the host accepts direct connections on. Derived from the request
    /// when empty.
    #[serde(default)]
    pub candidates: Vec<ConnectivityCandidate>,
    /// Port paired with the derived address.
    #[serde(default)]
    pub game_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    /// Required for heartbeat, update, teardown and host leave.
    pub host_token: String,
    pub session: SessionSnapshot,
}

/// `GET /sessions` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub mode: Option<GameMode>,
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

/// `PATCH /sessions/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSessionRequest {
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

impl From<UpdateSessionRequest> for SessionPatch {
    fn from(req: UpdateSessionRequest) -> Self {
        SessionPatch {
            room_name: req.room_name,
            map_id: req.map_id,
            track_id: req.track_id,
            is_custom_track: req.is_custom_track,
            track_hash: req.track_hash,
            track_size: req.track_size,
            laps: req.laps,
            game_mode: req.game_mode,
            race_status: req.race_status,
            download_allowed: req.download_allowed,
        }
    }
}

/// `POST /sessions/{id}/join`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSessionRequest {
    pub player: PlayerIdentity,
    #[serde(default)]
    pub as_spectator: bool,
    #[serde(default)]
    pub password: Option<String>,
    /// Content hashes of the tracks the joiner already holds.
    #[serde(default)]
    pub local_tracks: Vec<ContentHash>,
    #[serde(default)]
    pub candidates: Vec<ConnectivityCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionResponse {
    pub session_id: SessionId,
    pub role: Role,
    pub host: PlayerIdentity,
    pub connectivity: Vec<ConnectivityCandidate>,
    pub track: TrackDescriptor,
    pub track_availability: TrackAvailability,
    pub rejoined: bool,
    pub revision: u64,
}

impl From<JoinOutcome> for JoinSessionResponse {
    fn from(outcome: JoinOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            role: outcome.role,
            host: outcome.host,
            connectivity: outcome.connectivity,
            track: outcome.track,
            track_availability: outcome.availability,
            rejoined: outcome.rejoined,
            revision: outcome.revision,
        }
    }
}

/// `POST /sessions/{id}/leave`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaveSessionRequest {
    pub player_id: String,
    /// Required when the host leaves.
    #[serde(default)]
    pub host_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveSessionResponse {
    /// `left`, `session_closed` or `not_member`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl From<LeaveOutcome> for LeaveSessionResponse {
    fn from(outcome: LeaveOutcome) -> Self {
        match outcome {
            LeaveOutcome::Left(role) => Self {
                status: "left".to_string(),
                role: Some(role),
            },
            LeaveOutcome::SessionClosed => Self {
                status: "session_closed".to_string(),
                role: Some(Role::Host),
            },
            LeaveOutcome::NotMember => Self {
                status: "not_member".to_string(),
                role: None,
            },
        }
    }
}

/// `POST /sessions/{id}/heartbeat`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {
    pub host_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub session_id: SessionId,
    pub last_heartbeat: DateTime<Utc>,
    /// Seconds of silence after which the session expires.
    pub timeout_secs: u64,
}

/// `POST /sessions/{id}/track-ticket`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackTicketRequest {
    pub player_id: String,
    #[serde(default)]
    pub local_tracks: Vec<ContentHash>,
    /// Why the previous transfer was rejected, if it was.
    #[serde(default)]
    pub failure: Option<IntegrityError>,
}

impl TrackTicketRequest {
    pub fn catalog(&self) -> TrackCatalog {
        self.local_tracks.iter().cloned().collect()
    }
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
    pub subscribers: usize,
}
