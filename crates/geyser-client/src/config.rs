//! Client configuration
//!
//! Every field has a default, so an empty document is a valid configuration.
//! `heartbeat` and `reconnect` also accept a plain boolean: `true` selects the
//! defaults and `false` disables the feature.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ClientError, Result};

/// Configuration for a [`GeyserClient`](crate::GeyserClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Liveness pings
    #[serde(default, deserialize_with = "deserialize_toggle")]
    pub heartbeat: HeartbeatConfig,
    /// Tear the session down on any stream error
    #[serde(default = "default_true")]
    pub disconnect_on_errors: bool,
    /// Ping ids count up from 1 and restart after reaching this value
    #[serde(default = "default_ping_id_wrap")]
    pub ping_id_wrap: u32,
    /// Automatic reconnection
    #[serde(default, deserialize_with = "deserialize_toggle")]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            disconnect_on_errors: default_true(),
            ping_id_wrap: default_ping_id_wrap(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.enabled && self.heartbeat.interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "heartbeat.interval_ms must be greater than zero".into(),
            ));
        }
        if self.ping_id_wrap == 0 {
            return Err(ClientError::InvalidConfig(
                "ping_id_wrap must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_ping_id_wrap() -> u32 {
    1_000_000
}

// =============================================================================
// Timeouts
// =============================================================================

/// Operation timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Opening a stream until its first inbound message
    #[serde(default = "default_timeout_ms")]
    pub connect_ms: u64,
    /// Cancelling a stream until it reports close
    #[serde(default = "default_timeout_ms")]
    pub disconnect_ms: u64,
    /// A single outbound write
    #[serde(default = "default_timeout_ms")]
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_timeout_ms(),
            disconnect_ms: default_timeout_ms(),
            request_ms: default_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

// =============================================================================
// Heartbeat
// =============================================================================

/// Liveness ping configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time between pings
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
    /// How long to wait for any inbound message after a ping
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl HeartbeatConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

// =============================================================================
// Reconnect
// =============================================================================

/// Automatic reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Wait before each attempt
    #[serde(default)]
    pub delay_ms: u64,
    /// Attempts allowed before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Re-send the subscription set once a new session is live
    #[serde(default = "default_true")]
    pub resubscribe: bool,
    /// Reset the attempt counter once a session is fully restored
    #[serde(default = "default_true")]
    pub reset_attempts_after_connected: bool,
    /// Whether a session lost to a failed resubscribe keeps its attempt
    /// counted; when false the counter is reset before reconnecting
    #[serde(default = "default_true")]
    pub resubscribe_failure_counts_as_attempt: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            delay_ms: 0,
            max_attempts: default_max_attempts(),
            resubscribe: default_true(),
            reset_attempts_after_connected: default_true(),
            resubscribe_failure_counts_as_attempt: default_true(),
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

// =============================================================================
// Boolean shorthand
// =============================================================================

/// Sections that can be switched off with `section = false`
trait Toggle: Default {
    fn disabled() -> Self;
}

impl Toggle for HeartbeatConfig {
    fn disabled() -> Self {
        HeartbeatConfig::disabled()
    }
}

impl Toggle for ReconnectConfig {
    fn disabled() -> Self {
        ReconnectConfig::disabled()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagOrTable<T> {
    Flag(bool),
    Table(T),
}

fn deserialize_toggle<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Toggle,
{
    Ok(match FlagOrTable::<T>::deserialize(deserializer)? {
        FlagOrTable::Flag(true) => T::default(),
        FlagOrTable::Flag(false) => T::disabled(),
        FlagOrTable::Table(table) => table,
    })
}
