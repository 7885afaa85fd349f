//! Brokering of custom track transfers between host and joiner.
//!
//! The coordinator never carries track bytes. It only tells a joiner whether it needs
//! the payload and, if so, where to fetch it and which digest it must match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentHash, TrackCatalog};
use crate::coordinator::types::{ConnectivityCandidate, PlayerIdentity, Session, SessionId};

/// Where a joiner should fetch a track payload from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSource {
    pub host: PlayerIdentity,
    pub candidates: Vec<ConnectivityCandidate>,
}

/// Handshake artifact for a host-to-joiner track transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTicket {
    pub ticket_id: Uuid,
    pub session_id: SessionId,
    pub source: TransferSource,
    pub map_id: String,
    pub track_id: String,
    /// Digest the received payload must match.
    pub content_hash: ContentHash,
    pub byte_size: u64,
    pub issued_at: DateTime<Utc>,
}

impl TransferTicket {
    /// Check a received payload against this ticket.
    pub fn verify(&self, payload: &[u8]) -> Result<(), IntegrityError> {
        verify_payload(self, payload)
    }
}

/// Whether a joiner can race on the room's track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackAvailability {
    /// Built-in track, or the joiner already holds the payload.
    Available,
    /// The joiner must fetch the payload from the host.
    Download { ticket: TransferTicket },
    /// The joiner lacks the payload and the host does not share it.
    Unavailable,
}

impl TrackAvailability {
    pub fn ticket(&self) -> Option<&TransferTicket> {
        match self {
            TrackAvailability::Download { ticket } => Some(ticket),
            _ => None,
        }
    }
}

/// Received payload does not match the advertised content.
///
/// Joiners report it back as-is when asking for a fresh ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityError {
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Verify a received payload against the ticket it was fetched for.
///
/// A payload that fails verification must be discarded; the joiner may request a
/// fresh ticket and retry.
pub fn verify_payload(ticket: &TransferTicket, payload: &[u8]) -> Result<(), IntegrityError> {
    let actual_size = payload.len() as u64;
    if ticket.byte_size != 0 && ticket.byte_size != actual_size {
        return Err(IntegrityError::SizeMismatch {
            expected: ticket.byte_size,
            actual: actual_size,
        });
    }

    let actual = ContentHash::of(payload);
    if actual != ticket.content_hash {
        return Err(IntegrityError::HashMismatch {
            expected: ticket.content_hash.clone(),
            actual,
        });
    }

    Ok(())
}

/// Decides whether a joining peer needs a track transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackTransferCoordinator;

impl TrackTransferCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Compare the room's track against what the joiner holds locally.
    pub fn negotiate(
        &self,
        session: &Session,
        local: &TrackCatalog,
        now: DateTime<Utc>,
    ) -> TrackAvailability {
        let track = session.track_descriptor();

        if !track.is_custom {
            return TrackAvailability::Available;
        }

        let Some(content_hash) = track.content_hash else {
            // Custom rooms are validated to carry a hash; nothing to compare against.
            tracing::warn!(session_id = %session.id, "Custom track without content hash");
            return TrackAvailability::Unavailable;
        };

        if local.contains(&content_hash) {
            return TrackAvailability::Available;
        }

        if !track.download_allowed {
            tracing::debug!(session_id = %session.id, hash = %content_hash, "Track missing and download disabled");
            return TrackAvailability::Unavailable;
        }

        let ticket = TransferTicket {
            ticket_id: Uuid::new_v4(),
            session_id: session.id,
            source: TransferSource {
                host: session.host.clone(),
                candidates: session.host_candidates().to_vec(),
            },
            map_id: track.map_id,
            track_id: track.track_id,
            content_hash,
            byte_size: track.byte_size,
            issued_at: now,
        };

        tracing::debug!(
            session_id = %session.id,
            ticket_id = %ticket.ticket_id,
            hash = %ticket.content_hash,
            "Issued track transfer ticket"
        );

        TrackAvailability::Download { ticket }
    }
}
