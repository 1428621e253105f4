//! Shared helpers for geyser-client integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use geyser_client::transport::{MockStream, MockTransport};
use geyser_client::{ClientConfig, ClientEvent, GeyserClient};
use tokio::sync::broadcast;

/// Upper bound for any single wait in virtual time
pub const WAIT: Duration = Duration::from_secs(120);

pub fn client_with(config: ClientConfig) -> (GeyserClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let client = GeyserClient::with_config(transport.clone(), config).unwrap();
    (client, transport)
}

/// Connected client plus its first stream
pub async fn connected(config: ClientConfig) -> (GeyserClient, Arc<MockTransport>, Arc<MockStream>) {
    let (client, transport) = client_with(config);
    client.connect().await.unwrap();
    let stream = transport.wait_for_open(1).await;
    (client, transport, stream)
}

/// Wait for the first event matching `predicate`, discarding the others
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<ClientEvent>, predicate: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("Event channel closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

/// Collect events up to and including the first one matching `predicate`
pub async fn collect_until<F>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    predicate: F,
) -> Vec<ClientEvent>
where
    F: Fn(&ClientEvent) -> bool,
{
    let mut events = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = predicate(&event);
                    events.push(event);
                    if done {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("Event channel closed"),
            }
        }
    })
    .await
    .expect("Timed out collecting events");
    events
}

/// Event names, for order assertions
pub fn names(events: &[ClientEvent]) -> Vec<&'static str> {
    events.iter().map(ClientEvent::name).collect()
}

/// Let spawned tasks run without advancing virtual time far
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
