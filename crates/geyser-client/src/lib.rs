//! geyser-client - resilient subscription stream client
//!
//! Multiplexes any number of named subscriptions onto one long-lived
//! bidirectional stream, keeps the stream honest with an application-level
//! heartbeat and restores it (and its subscriptions) after unexpected loss.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GeyserClient                           │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ Subscription │  │  ClientInner │  │    EventBus      │   │
//! │  │  Registry    │  │ (state mach.)│  │  (broadcast)     │   │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────────┘   │
//! │         │                 │                                 │
//! │         │          ┌──────┴───────┐                         │
//! │         └─────────►│   Session    │◄── heartbeat / reader   │
//! │                    │ (one stream) │                         │
//! │                    └──────┬───────┘                         │
//! │                           │                                 │
//! │                  ┌────────┴─────────┐                       │
//! │                  │ StreamTransport  │                       │
//! │                  │ (JSON lines/mock)│                       │
//! │                  └──────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use geyser_client::{ClientEvent, GeyserClient, JsonLinesTransport, SubscribeOptions};
//! use geyser_core::Method;
//!
//! #[tokio::main]
//! async fn main() -> geyser_client::Result<()> {
//!     let transport = Arc::new(JsonLinesTransport::new("127.0.0.1:10000"));
//!     let client = GeyserClient::new(transport)?;
//!     let mut events = client.events();
//!
//!     client.connect().await?;
//!     let id = client
//!         .subscribe(Method::Slots, serde_json::json!({}), SubscribeOptions::default())
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::Data { subscription_id, update, .. } = event {
//!             println!("{}: {:?}", subscription_id, update.update);
//!         }
//!     }
//!
//!     client.unsubscribe(&id).await?;
//!     client.disconnect().await
//! }
//! ```

mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod send;
pub mod transport;

pub use client::{GeyserClient, SubscribeOptions};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig, TimeoutConfig};
pub use connection::ConnectionState;
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use registry::{SubscriptionRegistry, SubscriptionSnapshot};
pub use transport::{
    JsonLinesTransport, MockTransport, StreamHandle, StreamSignal, StreamTransport,
    TransportError,
};

// Re-export core types for convenience
pub use geyser_core::{Method, SubscribeRequest, SubscribeUpdate, Subscription};
