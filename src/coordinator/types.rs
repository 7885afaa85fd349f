//! Session data model.
//!
//! A [`Session`] is owned by the registry; everything handed out to callers or
//! observers is a [`SessionSnapshot`] or [`SessionSummary`] copy that never carries
//! the host token or password hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use uuid::Uuid;

use crate::tracks::{ContentHash, TrackDescriptor};

/// Registry-generated session identifier.
pub type SessionId = Uuid;

/// Identity of a player as reported by the game client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerIdentity {
    /// Stable platform id (e.g. Steam id).
    pub player_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl PlayerIdentity {
    pub fn new(player_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            display_name: display_name.into(),
            avatar_url: String::new(),
        }
    }
}

/// Address/port pair a peer offers for a direct connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectivityCandidate {
    pub address: IpAddr,
    pub port: u16,
}

/// Game mode a room is set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Race,
    Freestyle,
    Training,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Race => "race",
            GameMode::Freestyle => "freestyle",
            GameMode::Training => "training",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "race" => Some(GameMode::Race),
            "freestyle" => Some(GameMode::Freestyle),
            "training" => Some(GameMode::Training),
            _ => None,
        }
    }
}

/// Flight physics selected by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsMode {
    #[default]
    Sim,
    Arcade,
}

/// Host-reported progress of the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    /// Waiting for pilots
    #[default]
    Lobby,
    /// Race running
    InRace,
    /// Race completed
    Finished,
}

fn default_laps() -> u8 {
    3
}

/// What the room is racing on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomDescriptor {
    #[serde(default)]
    pub name: String,
    pub map_id: String,
    #[serde(default)]
    pub track_id: String,
    #[serde(default)]
    pub is_custom_track: bool,
    #[serde(default)]
    pub game_mode: GameMode,
    #[serde(default = "default_laps")]
    pub laps: u8,
    #[serde(default)]
    pub physics_mode: PhysicsMode,
}

/// Seat counters of a session.
///
/// The host holds its own role and is not counted against pilot capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub current_pilots: u32,
    pub max_pilots: u32,
    pub current_spectators: u32,
    pub max_spectators: u32,
}

impl Capacity {
    pub fn new(max_pilots: u32, max_spectators: u32) -> Self {
        Self {
            current_pilots: 0,
            max_pilots,
            current_spectators: 0,
            max_spectators,
        }
    }

    pub fn has_pilot_slot(&self) -> bool {
        self.current_pilots < self.max_pilots
    }

    pub fn has_spectator_slot(&self) -> bool {
        self.current_spectators < self.max_spectators
    }

    /// Whether a seat for `role` is free.
    pub fn has_slot_for(&self, role: Role) -> bool {
        match role {
            Role::Host => false,
            Role::Pilot => self.has_pilot_slot(),
            Role::Spectator => self.has_spectator_slot(),
        }
    }

    /// Both pilot and spectator seats are taken.
    pub fn is_full(&self) -> bool {
        !self.has_pilot_slot() && !self.has_spectator_slot()
    }

    pub fn within_bounds(&self) -> bool {
        self.current_pilots <= self.max_pilots && self.current_spectators <= self.max_spectators
    }
}

/// Access settings chosen by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
    /// SHA-256 hex of the room password, `None` when open to everyone.
    pub password_hash: Option<String>,
    pub download_allowed: bool,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Full,
    /// Torn down by the host.
    Closed,
    /// Host stopped heartbeating.
    Expired,
}

impl SessionState {
    /// Discoverable and joinable states.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::Full)
    }
}

/// Role of a member within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Pilot,
    Spectator,
}

impl Role {
    /// Role a joiner asks for.
    pub fn requested(as_spectator: bool) -> Self {
        if as_spectator {
            Role::Spectator
        } else {
            Role::Pilot
        }
    }

    /// Whether a member holding this role satisfies a request for `requested`.
    pub fn satisfies(&self, requested: Role) -> bool {
        match (self, requested) {
            (Role::Host, Role::Pilot) => true,
            (held, wanted) => *held == wanted,
        }
    }
}

/// A player seated in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub player: PlayerIdentity,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub candidates: Vec<ConnectivityCandidate>,
}

/// One advertised multiplayer room.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub host: PlayerIdentity,
    pub(crate) host_token: String,
    pub room: RoomDescriptor,
    pub track_hash: Option<ContentHash>,
    pub track_size: u64,
    pub capacity: Capacity,
    pub(crate) settings: SessionSettings,
    pub state: SessionState,
    pub race_status: RaceStatus,
    /// Incremented on every applied mutation.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub members: Vec<Member>,
}

impl Session {
    /// Descriptor of the room's selected track.
    pub fn track_descriptor(&self) -> TrackDescriptor {
        TrackDescriptor {
            map_id: self.room.map_id.clone(),
            track_id: self.room.track_id.clone(),
            is_custom: self.room.is_custom_track,
            content_hash: self.track_hash.clone(),
            byte_size: self.track_size,
            download_allowed: self.settings.download_allowed,
        }
    }

    pub fn host_member(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.role == Role::Host)
    }

    /// Connectivity candidates offered by the host.
    pub fn host_candidates(&self) -> &[ConnectivityCandidate] {
        self.host_member()
            .map(|m| m.candidates.as_slice())
            .unwrap_or(&[])
    }

    pub fn member(&self, player_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.player.player_id == player_id)
    }

    pub fn has_password(&self) -> bool {
        self.settings.password_hash.is_some()
    }

    /// Whether `password` opens this room.
    pub fn password_matches(&self, password: Option<&str>) -> bool {
        match &self.settings.password_hash {
            None => true,
            Some(expected) => password.is_some_and(|p| hash_password(p) == *expected),
        }
    }

    pub fn host_token_matches(&self, token: &str) -> bool {
        !token.is_empty() && self.host_token == token
    }

    /// Seat a new member and bump the matching counter.
    ///
    /// Callers check capacity first; exceeding it here is an invariant violation.
    pub fn admit(
        &mut self,
        player: PlayerIdentity,
        role: Role,
        candidates: Vec<ConnectivityCandidate>,
        now: DateTime<Utc>,
    ) -> Member {
        assert!(
            self.capacity.has_slot_for(role),
            "admitting {:?} into session {} without a free seat",
            role,
            self.id
        );

        match role {
            Role::Pilot => self.capacity.current_pilots += 1,
            Role::Spectator => self.capacity.current_spectators += 1,
            Role::Host => unreachable!("host seat is assigned at creation"),
        }

        let member = Member {
            player,
            role,
            joined_at: now,
            candidates,
        };
        self.members.push(member.clone());
        self.recompute_state();
        member
    }

    /// Remove a member and release its seat.
    pub fn release(&mut self, player_id: &str) -> Option<Member> {
        let index = self
            .members
            .iter()
            .position(|m| m.player.player_id == player_id)?;
        let member = self.members.remove(index);

        match member.role {
            Role::Pilot => {
                self.capacity.current_pilots = self
                    .capacity
                    .current_pilots
                    .checked_sub(1)
                    .expect("pilot counter underflow");
            }
            Role::Spectator => {
                self.capacity.current_spectators = self
                    .capacity
                    .current_spectators
                    .checked_sub(1)
                    .expect("spectator counter underflow");
            }
            Role::Host => {}
        }

        self.recompute_state();
        Some(member)
    }

    /// Re-derive Open/Full from the counters; terminal states are left alone.
    pub fn recompute_state(&mut self) {
        if !self.state.is_live() {
            return;
        }
        self.state = if self.capacity.is_full() {
            SessionState::Full
        } else {
            SessionState::Open
        };
    }

    /// List view used by discovery and realtime events.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            host_name: self.host.display_name.clone(),
            room: self.room.clone(),
            track: self.track_descriptor(),
            capacity: self.capacity,
            state: self.state,
            race_status: self.race_status,
            has_password: self.has_password(),
            created_at: self.created_at,
            revision: self.revision,
        }
    }

    /// Full view including members.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            summary: self.summary(),
            host: self.host.clone(),
            members: self.members.clone(),
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Discovery view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub host_name: String,
    pub room: RoomDescriptor,
    pub track: TrackDescriptor,
    pub capacity: Capacity,
    pub state: SessionState,
    pub race_status: RaceStatus,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
    pub revision: u64,
}

/// Full view of a session without secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub host: PlayerIdentity,
    pub members: Vec<Member>,
    pub last_heartbeat: DateTime<Utc>,
}

/// SHA-256 hex of a room password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
