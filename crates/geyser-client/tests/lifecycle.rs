//! Connect and disconnect behavior against the mock transport

mod common;

use std::time::Duration;

use common::{client_with, collect_until, connected, names, settle, wait_for};
use geyser_client::{
    ClientConfig, ClientError, ClientEvent, ConnectionState, Method, SubscribeOptions,
    TransportError,
};
use serde_json::json;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_connect_waits_for_first_message() {
    let (client, transport) = client_with(ClientConfig::default());
    let mut events = client.events();

    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(*client.state_changes().borrow(), ConnectionState::Connected);

    // The liveness probe is the first ping of the session
    let stream = transport.wait_for_open(1).await;
    assert_eq!(stream.ping_ids(), vec![1]);

    let seen = collect_until(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    assert_eq!(names(&seen).first(), Some(&"connect"));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::PongReceived { id: 1 })));
}

#[tokio::test(start_paused = true)]
async fn test_connect_when_connected_is_noop() {
    let (client, transport, _stream) = connected(ClientConfig::default()).await;
    let mut events = client.events();

    client.connect().await.unwrap();

    assert_eq!(transport.open_attempts(), 1);
    settle().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let (client, transport) = client_with(ClientConfig::default());

    let (first, second) = tokio::join!(client.connect(), client.connect());

    first.unwrap();
    second.unwrap();
    assert_eq!(transport.open_attempts(), 1);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_without_first_message() {
    let (client, transport) = client_with(ClientConfig::default());
    transport.set_auto_pong(false);

    let started = Instant::now();
    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectTimeout));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(transport.stream(0).unwrap().is_destroyed());

    // A failed initial connect never schedules a reconnect
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_rejects_connect() {
    let (client, transport) = client_with(ClientConfig::default());
    transport.fail_next_open(TransportError::ConnectionFailed("refused".into()));

    let err = client.connect().await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Transport(TransportError::ConnectionFailed(_))
    ));
    assert_eq!(client.state(), ConnectionState::Idle);

    // The next attempt starts from scratch
    client.connect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_stream_end_before_first_message() {
    let (client, transport) = client_with(ClientConfig::default());
    transport.set_auto_pong(false);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    transport.wait_for_open(1).await.end();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::StreamEndedUnexpectedly));
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_stream_close_before_first_message() {
    let (client, transport) = client_with(ClientConfig::default());
    transport.set_auto_pong(false);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    transport.wait_for_open(1).await.close();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::StreamClosedUnexpectedly));
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_before_first_message() {
    let (client, transport) = client_with(ClientConfig::default());
    transport.set_auto_pong(false);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    transport
        .wait_for_open(1)
        .await
        .push_error(TransportError::ReadFailed("reset by peer".into()));

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::ReadFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_clears_subscriptions() {
    let (client, transport, stream) = connected(ClientConfig::default()).await;
    client
        .subscribe(Method::Slots, json!({}), SubscribeOptions::with_id("slots"))
        .await
        .unwrap();
    let mut events = client.events();

    client.disconnect().await.unwrap();

    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(client.subscription_ids().is_empty());
    assert!(stream.is_cancelled());

    let seen = collect_until(&mut events, |e| {
        matches!(e, ClientEvent::Disconnected { .. })
    })
    .await;
    // The cancel echo is swallowed
    assert!(!seen.iter().any(|e| matches!(e, ClientEvent::Error(_))));
    match seen.last() {
        Some(ClientEvent::Disconnected {
            explicit,
            subscriptions,
        }) => {
            assert!(*explicit);
            assert_eq!(subscriptions.len(), 1);
            assert_eq!(subscriptions[0].0, "slots");
        }
        other => panic!("Expected Disconnected, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_idle_touches_nothing() {
    let (client, transport) = client_with(ClientConfig::default());

    client.disconnect().await.unwrap();

    assert_eq!(transport.open_attempts(), 0);
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_disconnects_share_one_close() {
    let (client, _transport, stream) = connected(ClientConfig::default()).await;
    let mut events = client.events();

    let (first, second) = tokio::join!(client.disconnect(), client.disconnect());
    first.unwrap();
    second.unwrap();
    assert!(stream.is_cancelled());

    wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    settle().await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::Disconnected { .. }),
            "Disconnected emitted twice"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_timeout_forces_destroy() {
    let (client, _transport, stream) = connected(ClientConfig::default()).await;
    stream.set_echo_cancel(false);
    let mut events = client.events();

    let started = Instant::now();
    client.disconnect().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(stream.is_cancelled());
    assert!(stream.is_destroyed());
    assert_eq!(client.state(), ConnectionState::Idle);

    let seen = collect_until(&mut events, |e| {
        matches!(e, ClientEvent::Disconnected { .. })
    })
    .await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Error(ClientError::DisconnectTimeout))));
}

#[tokio::test(start_paused = true)]
async fn test_non_explicit_disconnect_keeps_subscriptions() {
    let (client, transport, _stream) = connected(ClientConfig::default()).await;
    client
        .subscribe(Method::Blocks, json!({}), SubscribeOptions::default())
        .await
        .unwrap();
    let mut events = client.events();

    client.disconnect_with(false).await.unwrap();

    match wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await {
        ClientEvent::Disconnected { explicit, .. } => assert!(!explicit),
        _ => unreachable!(),
    }
    wait_for(&mut events, |e| matches!(e, ClientEvent::Resubscribed { .. })).await;

    assert_eq!(client.subscription_count(), 1);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_explicit_disconnect_restarts_ping_ids() {
    let mut config = ClientConfig::default();
    config.heartbeat.interval_ms = 1000;
    let (client, transport, first) = connected(config).await;
    let mut events = client.events();

    wait_for(&mut events, |e| matches!(e, ClientEvent::PingSent { id: 3 })).await;
    client.disconnect().await.unwrap();
    client.connect().await.unwrap();

    let second = transport.wait_for_open(2).await;
    assert_eq!(first.ping_ids()[..3], [1, 2, 3]);
    assert_eq!(second.ping_ids().first(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_live_stream_error_drives_reconnect() {
    let (client, transport, stream) = connected(ClientConfig::default()).await;
    let mut events = client.events();

    stream.push_error(TransportError::ReadFailed("reset by peer".into()));

    let seen: Vec<ClientEvent> =
        collect_until(&mut events, |e| matches!(e, ClientEvent::Connected))
            .await
            .into_iter()
            .filter(|e| !matches!(e, ClientEvent::PingSent { .. } | ClientEvent::PongReceived { .. }))
            .collect();
    assert_eq!(
        names(&seen),
        vec!["error", "disconnected", "reconnect", "connected"]
    );
    assert!(matches!(
        &seen[0],
        ClientEvent::Error(ClientError::Transport(TransportError::ReadFailed(_)))
    ));
    assert!(matches!(
        &seen[2],
        ClientEvent::Reconnecting {
            attempt: 1,
            remaining: 4
        }
    ));
    assert!(stream.is_destroyed());
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_tolerated_when_configured() {
    let config = ClientConfig {
        disconnect_on_errors: false,
        ..ClientConfig::default()
    };
    let (client, transport, stream) = connected(config).await;
    let mut events = client.events();

    stream.push_error(TransportError::ProtocolError("bad frame".into()));

    wait_for(&mut events, |e| matches!(e, ClientEvent::Error(_))).await;
    settle().await;
    assert!(client.is_connected());
    assert!(!stream.is_destroyed());
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peer_end_tears_down_without_error() {
    let (client, _transport, stream) = connected(ClientConfig::default()).await;
    let mut events = client.events();

    stream.end();

    let seen = collect_until(&mut events, |e| {
        matches!(e, ClientEvent::Reconnecting { .. })
    })
    .await;
    assert!(!seen.iter().any(|e| matches!(e, ClientEvent::Error(_))));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { explicit: false, .. })));
}
