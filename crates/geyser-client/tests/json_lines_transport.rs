//! End-to-end run over a local newline-delimited JSON server

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::wait_for;
use geyser_client::{
    ClientConfig, ClientEvent, ConnectionState, GeyserClient, JsonLinesTransport, Method,
    SubscribeOptions,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Accepts one connection: answers pings with pongs and every non-empty
/// slots bucket with a slot update addressed to its subscription ids.
async fn spawn_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (seen_tx, seen) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let message: Value = serde_json::from_str(&line).unwrap();
            let _ = seen_tx.send(message.clone());

            let reply = if let Some(id) = message.get("ping").and_then(|p| p.get("id")) {
                Some(json!({ "filters": [], "pong": { "id": id } }))
            } else {
                message
                    .get("slots")
                    .and_then(Value::as_object)
                    .filter(|slots| !slots.is_empty())
                    .map(|slots| {
                        let filters: Vec<&String> = slots.keys().collect();
                        json!({ "filters": filters, "slot": { "slot": 42 } })
                    })
            };

            if let Some(reply) = reply {
                let mut bytes = serde_json::to_vec(&reply).unwrap();
                bytes.push(b'\n');
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        }
    });

    (address, seen)
}

#[tokio::test]
async fn test_subscribe_over_tcp() {
    let (address, mut seen) = spawn_server().await;
    let transport = Arc::new(JsonLinesTransport::new(address).with_token("secret"));
    let client = GeyserClient::with_config(transport, ClientConfig::default()).unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();

    let preamble = seen.recv().await.unwrap();
    assert_eq!(preamble, json!({ "x-token": "secret" }));
    let probe = seen.recv().await.unwrap();
    assert_eq!(probe["ping"], json!({ "id": 1 }));

    client
        .subscribe(Method::Slots, json!({}), SubscribeOptions::with_id("tip"))
        .await
        .unwrap();

    let event = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(&mut events, |e| matches!(e, ClientEvent::Data { .. })),
    )
    .await
    .unwrap();
    match event {
        ClientEvent::Data {
            subscription_id,
            update,
            ..
        } => {
            assert_eq!(subscription_id, "tip");
            assert_eq!(update.method(), Some(Method::Slots));
        }
        _ => unreachable!(),
    }

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!(client.subscription_count(), 0);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = GeyserClient::new(Arc::new(JsonLinesTransport::new(address))).unwrap();

    assert!(client.connect().await.is_err());
    assert_eq!(client.state(), ConnectionState::Idle);
}
