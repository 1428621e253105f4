//! Client errors

use geyser_core::{CoreError, SubscribeRequest};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by client operations and carried by error events
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    /// No first message arrived within the connect timeout
    #[error("Connect timeout")]
    ConnectTimeout,

    /// The peer did not close the stream within the disconnect timeout
    #[error("Disconnect timeout")]
    DisconnectTimeout,

    /// A write was not accepted within the request timeout
    #[error("Request timeout")]
    RequestTimeout { request: Box<SubscribeRequest> },

    /// The transport rejected a write
    #[error("Request error: {source}")]
    RequestWriteFailed {
        request: Box<SubscribeRequest>,
        #[source]
        source: TransportError,
    },

    #[error("Subscription with id {0} already exists")]
    DuplicateSubscriptionId(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// The stream ended before the first message arrived
    #[error("Stream ended unexpectedly")]
    StreamEndedUnexpectedly,

    /// The stream closed before the first message arrived
    #[error("Stream closed unexpectedly")]
    StreamClosedUnexpectedly,

    /// No inbound message arrived within the heartbeat timeout after a ping
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// Automatic reconnection gave up; the client stays idle
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Client is not connected")]
    NotConnected,

    /// The session a request belonged to ended before the request completed
    #[error("Request aborted")]
    Aborted,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(Box<ClientError>),

    #[error("Resubscribe failed: {0}")]
    ResubscribeFailed(Box<ClientError>),

    /// Replying to a server ping failed
    #[error("Pong failed: {0}")]
    PeerPingReplyFailed(Box<ClientError>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// The request a write error belongs to
    pub fn request(&self) -> Option<&SubscribeRequest> {
        match self {
            ClientError::RequestTimeout { request }
            | ClientError::RequestWriteFailed { request, .. } => Some(request.as_ref()),
            ClientError::UnsubscribeFailed(inner)
            | ClientError::ResubscribeFailed(inner)
            | ClientError::PeerPingReplyFailed(inner) => inner.request(),
            _ => None,
        }
    }
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidMethod(method) => ClientError::InvalidMethod(method),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_reachable_through_wrappers() {
        let err = ClientError::UnsubscribeFailed(Box::new(ClientError::RequestTimeout {
            request: Box::new(SubscribeRequest::ping(9)),
        }));
        assert_eq!(err.request().and_then(|r| r.ping).map(|p| p.id), Some(9));
        assert!(ClientError::NotConnected.request().is_none());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ClientError::DuplicateSubscriptionId("a".into()).to_string(),
            "Subscription with id a already exists"
        );
        assert_eq!(
            ClientError::RequestWriteFailed {
                request: Box::default(),
                source: TransportError::ConnectionClosed,
            }
            .to_string(),
            "Request error: Connection closed"
        );
        assert_eq!(
            ClientError::from(CoreError::InvalidMethod("ping".into())).to_string(),
            "Invalid method: ping"
        );
    }
}
