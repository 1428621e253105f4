//! Stream transport trait and types

use std::sync::Arc;

use async_trait::async_trait;
use geyser_core::{SubscribeRequest, SubscribeUpdate};
use tokio::sync::mpsc;

use super::TransportError;

/// Lifecycle signal reported by an open stream
///
/// Every stream reports `Close` exactly once, last. `End` means the peer
/// finished the stream gracefully and may be followed by `Close`.
#[derive(Debug, Clone)]
pub enum StreamSignal {
    /// Inbound message
    Data(SubscribeUpdate),
    /// Stream-level failure
    Error(TransportError),
    /// Peer ended the stream
    End,
    /// Stream is gone
    Close,
}

/// A freshly opened bidirectional stream
pub struct OpenedStream {
    /// Write side and lifecycle control
    pub handle: Arc<dyn StreamHandle>,
    /// Read side: inbound messages and lifecycle signals, in order
    pub signals: mpsc::UnboundedReceiver<StreamSignal>,
}

/// Write side of an open stream
#[async_trait]
pub trait StreamHandle: Send + Sync {
    /// Write one request; resolves once the transport accepted it
    async fn write(&self, request: &SubscribeRequest) -> Result<(), TransportError>;

    /// Ask the peer to close the stream
    ///
    /// The stream answers with `Error(Cancelled)` and then `Close`.
    fn cancel(&self);

    /// Tear the stream down immediately; reports `Close`
    fn destroy(&self);
}

/// Factory for subscription streams
///
/// Implementations own the endpoint, credentials and wire encoding. The
/// client only ever holds one stream at a time.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a new stream
    async fn open(&self) -> Result<OpenedStream, TransportError>;
}
