//! Public client handle

use std::sync::Arc;

use geyser_core::Method;
use tokio::sync::{broadcast, watch};
use tokio_stream::Stream;

use crate::config::ClientConfig;
use crate::connection::{ClientInner, ConnectionState};
use crate::error::Result;
use crate::events::{self, ClientEvent};
use crate::registry::SubscriptionSnapshot;
use crate::transport::StreamTransport;

/// Options for [`GeyserClient::subscribe`]
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Subscription id; generated when `None`
    pub id: Option<String>,
}

impl SubscribeOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

/// Resilient client for a multiplexed subscription stream
///
/// Cloning is cheap; all clones drive the same connection. Background tasks
/// keep running until [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct GeyserClient {
    inner: Arc<ClientInner>,
}

impl GeyserClient {
    /// Create a client with the default configuration
    pub fn new(transport: Arc<dyn StreamTransport>) -> Result<Self> {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Create a client; fails if `config` does not validate
    pub fn with_config(transport: Arc<dyn StreamTransport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner::new(transport, config)),
        })
    }

    /// Connect and wait until the stream is live
    ///
    /// Returns immediately when already connected; concurrent calls share one
    /// attempt. Subscriptions retained from a lost session are restored.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Close the stream and drop every subscription
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect(true).await
    }

    /// Close the stream
    ///
    /// With `explicit = false` subscriptions are kept and the reconnect
    /// protocol runs as if the stream had been lost.
    pub async fn disconnect_with(&self, explicit: bool) -> Result<()> {
        self.inner.disconnect(explicit).await
    }

    /// Register a subscription and publish the new subscription set
    ///
    /// Returns the subscription id. Nothing is registered if publishing
    /// fails.
    pub async fn subscribe(
        &self,
        method: Method,
        params: serde_json::Value,
        options: SubscribeOptions,
    ) -> Result<String> {
        self.inner.subscribe(method, params, options.id).await
    }

    /// Like [`subscribe`](Self::subscribe) with the method given by name
    pub async fn subscribe_named(
        &self,
        method: &str,
        params: serde_json::Value,
        options: SubscribeOptions,
    ) -> Result<String> {
        let method: Method = method.parse()?;
        self.subscribe(method, params, options).await
    }

    /// Remove a subscription; unknown ids are ignored
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.inner.unsubscribe(id).await
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.state(),
            ConnectionState::Connected | ConnectionState::Disconnecting
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_changes()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry().read().len()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.inner.registry().read().ids()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.inner.registry().read().has(id)
    }

    pub fn subscriptions(&self) -> SubscriptionSnapshot {
        self.inner.registry().read().snapshot()
    }

    /// Consecutive reconnect attempts since the last restored session
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Receive every event emitted from now on
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events()
    }

    /// [`events`](Self::events) as a `Stream`
    pub fn event_stream(&self) -> impl Stream<Item = ClientEvent> {
        events::into_stream(self.inner.events())
    }
}

impl std::fmt::Debug for GeyserClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeyserClient")
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
