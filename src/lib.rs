//! RaceHub - Session Coordinator and Track Distribution Service
//!
//! Lets independent game clients find each other, form short-lived multiplayer
//! rooms and exchange custom track content by hash, without relaying any
//! gameplay traffic. Provides an HTTP API for session registration, discovery
//! and joins, host heartbeats with automatic expiry, and a websocket channel
//! pushing session-list changes.

pub mod api;
pub mod coordinator;
pub mod storage;
pub mod tracks;

// Re-export commonly used types
pub use api::Coordinator;
pub use coordinator::{CoordinatorError, CoordinatorSettings, SessionRegistry};
pub use storage::config::AppConfig;
pub use tracks::{ContentHash, TrackCatalog};
