//! Connection lifecycle
//!
//! This module owns the stream session, the heartbeat that keeps it honest
//! and the reconnect loop that replaces it when it is lost.

mod heartbeat;
mod manager;
mod session;

pub(crate) use manager::ClientInner;

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session and nothing scheduled
    Idle,
    /// A stream is being opened and probed
    Connecting,
    /// A session is live
    Connected,
    /// An explicit or caller-requested disconnect is in flight
    Disconnecting,
    /// The session was lost and a reconnect attempt is scheduled
    ReconnectWaiting,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::ReconnectWaiting => "reconnect_waiting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
