//! Client event surface
//!
//! Everything the client observes on the stream, and every lifecycle step it
//! takes, is published as a [`ClientEvent`] on a broadcast channel. Slow
//! consumers lose the oldest events rather than stalling the client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geyser_core::{SubscribeRequest, SubscribeUpdate};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::error::ClientError;
use crate::registry::SubscriptionSnapshot;

/// Events buffered per consumer before the oldest are dropped
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle and data events
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A caller asked to connect
    ConnectRequested,
    /// A session became live
    Connected,
    /// The live session ended
    Disconnected {
        /// True when the caller asked for the disconnect
        explicit: bool,
        /// Registry contents at the moment of loss
        subscriptions: SubscriptionSnapshot,
    },
    /// A reconnect attempt was scheduled
    Reconnecting { attempt: u32, remaining: u32 },
    /// A reconnect attempt failed
    ReconnectFailed { error: ClientError },
    /// Automatic reconnection gave up
    ReconnectExhausted { attempts: u32 },
    /// The subscription set is about to be re-sent on a new session
    Resubscribing { subscriptions: SubscriptionSnapshot },
    /// The subscription set was restored on a new session
    Resubscribed { subscriptions: SubscriptionSnapshot },
    /// The merged subscription request was accepted by the transport
    Updated { request: Arc<SubscribeRequest> },
    /// A heartbeat ping is being sent
    PingSent { id: u32 },
    /// The server answered a ping
    PongReceived { id: u32 },
    /// An update matched a registered subscription; one event per match
    Data {
        subscription_id: String,
        update: Arc<SubscribeUpdate>,
        received_at: DateTime<Utc>,
    },
    /// An update matched no registered subscription
    UnhandledMessage { update: Arc<SubscribeUpdate> },
    /// An error observed on the live stream or during teardown
    Error(ClientError),
}

impl ClientEvent {
    /// Short event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ConnectRequested => "connect",
            ClientEvent::Connected => "connected",
            ClientEvent::Disconnected { .. } => "disconnected",
            ClientEvent::Reconnecting { .. } => "reconnect",
            ClientEvent::ReconnectFailed { .. } => "reconnect_failed",
            ClientEvent::ReconnectExhausted { .. } => "reconnect_exhausted",
            ClientEvent::Resubscribing { .. } => "resubscribe",
            ClientEvent::Resubscribed { .. } => "resubscribed",
            ClientEvent::Updated { .. } => "updated",
            ClientEvent::PingSent { .. } => "ping",
            ClientEvent::PongReceived { .. } => "pong",
            ClientEvent::Data { .. } => "data",
            ClientEvent::UnhandledMessage { .. } => "unhandled_message",
            ClientEvent::Error(_) => "error",
        }
    }
}

/// Broadcast sender shared by the client and its background tasks
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish `event`; dropped when nobody listens
    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

/// Adapt a broadcast receiver into a `Stream`, skipping over lag gaps
pub fn into_stream(rx: broadcast::Receiver<ClientEvent>) -> impl Stream<Item = ClientEvent> {
    BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event consumer lagged, events dropped");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_skips_lagged_events() {
        let bus = EventBus::new(2);
        let stream = into_stream(bus.subscribe());
        tokio::pin!(stream);

        for id in 0..4 {
            bus.emit(ClientEvent::PingSent { id });
        }
        drop(bus);

        let mut ids = Vec::new();
        while let Some(event) = stream.next().await {
            if let ClientEvent::PingSent { id } = event {
                ids.push(id);
            }
        }
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_emit_without_listeners_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(ClientEvent::Connected);
        assert_eq!(ClientEvent::Connected.name(), "connected");
    }
}
