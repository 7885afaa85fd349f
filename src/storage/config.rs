//! Application configuration.
//!
//! Stored as TOML in the platform data directory unless a path is given explicitly.
//! Every section and field is optional in the file; missing values take defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::heartbeat::{
    HeartbeatPolicy, DEFAULT_EXPIRY_MULTIPLIER, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::coordinator::notifier::DEFAULT_QUEUE_CAPACITY;
use crate::coordinator::registry::{
    RegistryLimits, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_PILOTS, DEFAULT_MAX_SPECTATORS,
};
use crate::coordinator::CoordinatorSettings;

/// Port game hosts listen on when they do not advertise one.
pub const DEFAULT_GAME_PORT: u16 = 5056;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Listener settings
    pub server: ServerSettings,
    /// Host liveness settings
    pub heartbeat: HeartbeatSettings,
    /// Capacity ceilings and locking
    pub limits: LimitSettings,
    /// Realtime fan-out settings
    pub notifier: NotifierSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            limits: LimitSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat.interval_secs must be positive".into()));
        }
        if self.heartbeat.expiry_multiplier == 0 {
            return Err(ConfigError::Invalid("heartbeat.expiry_multiplier must be positive".into()));
        }
        if self.heartbeat.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat.sweep_interval_secs must be positive".into()));
        }
        if self.limits.max_pilots == 0 || self.limits.max_spectators == 0 {
            return Err(ConfigError::Invalid("limits must allow at least one seat".into()));
        }
        if self.notifier.queue_capacity == 0 {
            return Err(ConfigError::Invalid("notifier.queue_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Coordinator tuning derived from this configuration.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            limits: RegistryLimits {
                max_pilots: self.limits.max_pilots,
                max_spectators: self.limits.max_spectators,
                lock_timeout: Duration::from_millis(self.limits.lock_timeout_ms),
            },
            heartbeat: HeartbeatPolicy {
                interval: Duration::from_secs(self.heartbeat.interval_secs),
                expiry_multiplier: self.heartbeat.expiry_multiplier,
                sweep_interval: Duration::from_secs(self.heartbeat.sweep_interval_secs),
            },
            queue_capacity: self.notifier.queue_capacity,
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// HTTP API bind address
    pub http_addr: SocketAddr,
    /// Realtime websocket bind address
    pub realtime_addr: SocketAddr,
    /// Game port assumed for hosts that advertise no candidate
    pub default_game_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            realtime_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            default_game_port: DEFAULT_GAME_PORT,
        }
    }
}

/// Host liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Expected heartbeat interval in seconds
    pub interval_secs: u64,
    /// Missed intervals before a session expires
    pub expiry_multiplier: u32,
    /// Sweep interval in seconds
    pub sweep_interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            expiry_multiplier: DEFAULT_EXPIRY_MULTIPLIER,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Capacity ceilings and locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Default and maximum pilots per session
    pub max_pilots: u32,
    /// Default and maximum spectators per session
    pub max_spectators: u32,
    /// Per-session lock timeout in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_pilots: DEFAULT_MAX_PILOTS,
            max_spectators: DEFAULT_MAX_SPECTATORS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// Realtime fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    /// Events buffered per subscriber before the oldest are dropped
    pub queue_capacity: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "racehub", "RaceHub")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from `path`, or from the default location when `None`.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if !path.exists() {
        tracing::info!("No config file at {}, using defaults", path.display());
        let config = AppConfig {
            data_dir: get_data_dir(),
            ..Default::default()
        };
        return Ok(config);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = get_data_dir();
    config.validate()?;

    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save configuration to `path`, or to the default location when `None`.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(path)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
