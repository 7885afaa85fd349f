//! Custom track content: hashing, local catalogs and host-to-joiner transfer brokering.
//!
//! Tracks are content-addressed: two descriptors name the same content iff their
//! SHA-256 content hashes match, whatever their map and track ids say.

pub mod catalog;
pub mod transfer;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// Re-export commonly used types
pub use catalog::TrackCatalog;
pub use transfer::{
    verify_payload, IntegrityError, TrackAvailability, TrackTransferCoordinator, TransferSource,
    TransferTicket,
};

/// Length of a hex-encoded SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 64;

/// Lowercase hex SHA-256 digest of a track payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hex digest, normalizing it to lowercase.
    pub fn parse(value: &str) -> Result<Self, InvalidContentHash> {
        let trimmed = value.trim();
        if trimmed.len() != CONTENT_HASH_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidContentHash(value.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Digest of the given payload bytes.
    pub fn of(payload: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(payload)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidContentHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// A string that is not a 64-character hex digest.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid content hash {0:?}: expected {CONTENT_HASH_LEN} hex characters")]
pub struct InvalidContentHash(pub String);

/// Compute the canonical content hash of a track payload.
pub fn content_hash(payload: &[u8]) -> ContentHash {
    ContentHash::of(payload)
}

/// The track a room is set up to race on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub map_id: String,
    pub track_id: String,
    /// Custom (community) track rather than one shipped with the game.
    pub is_custom: bool,
    /// Integrity digest of the payload; always present for custom tracks.
    pub content_hash: Option<ContentHash>,
    /// Payload size in bytes, zero when unknown.
    pub byte_size: u64,
    pub download_allowed: bool,
}

impl TrackDescriptor {
    /// Whether both descriptors name the same payload bytes.
    pub fn same_content(&self, other: &TrackDescriptor) -> bool {
        match (&self.content_hash, &other.content_hash) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
