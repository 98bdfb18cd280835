//! Integration tests for the session transport over a scripted wire.
//!
//! Covers correlation-uid multiplexing, both response modes, timeout
//! rejection, and the handshake sequence. No sockets are involved.

mod support;

use std::time::Duration;

use colloquy_client::core::protocol::{
    InteractParams, RequestPayload, ServerBody, SessionConfig,
};
use colloquy_client::{ClientError, SessionTransport, TransportEvent};
use serde_json::json;
use support::{TestConnector, WireHarness};
use tokio::sync::mpsc;

async fn connect() -> (
    SessionTransport,
    WireHarness,
    mpsc::UnboundedReceiver<TransportEvent>,
) {
    let (connector, harness) = TestConnector::single();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = SessionTransport::connect(
        connector.as_ref(),
        "wss://svc.test/session",
        events_tx,
        Duration::from_secs(50),
        None,
    )
    .await
    .expect("connect failed");
    (transport, harness, events_rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn single_request_resolves_on_matching_uid() {
    let (transport, mut harness, mut events) = connect().await;

    let requester = transport.clone();
    let pending = tokio::spawn(async move { requester.request(RequestPayload::Ping).await });

    let request = harness.next_request().await;
    assert_eq!(request["kind"], "ping");
    assert_eq!(request["type"], "request");
    assert!(request["uid"].as_str().is_some());
    assert!(request["client_start_time"].as_str().is_some());

    harness.reply_ok(&request);
    let envelope = pending.await.unwrap().expect("request should resolve");
    assert_eq!(envelope.body, ServerBody::Ping);

    // The resolved reply is also emitted as a message event.
    support::settle().await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TransportEvent::Message(_))));
}

#[tokio::test]
async fn error_reply_rejects_the_request() {
    let (transport, mut harness, _events) = connect().await;

    let requester = transport.clone();
    let pending =
        tokio::spawn(async move { requester.request(RequestPayload::GetConfiguration).await });

    let request = harness.next_request().await;
    harness.inject(&json!({
        "uid": request["uid"],
        "kind": "error",
        "error": "configuration rejected",
    }));

    let error = pending.await.unwrap().expect_err("error reply must reject");
    assert!(matches!(error, ClientError::Server { ref message } if message.contains("rejected")));
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects_and_removes_the_record() {
    let (transport, mut harness, mut events) = connect().await;

    let requester = transport.clone();
    let pending = tokio::spawn(async move { requester.request(RequestPayload::Ping).await });

    let request = harness.next_request().await;
    tokio::time::advance(Duration::from_secs(51)).await;

    let error = pending.await.unwrap().expect_err("must time out");
    assert!(matches!(error, ClientError::RequestTimeout { kind: "ping", .. }));

    support::settle().await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TransportEvent::RequestTimeout { kind: "ping", .. })));

    // A late reply finds no record: it is dropped, not delivered.
    harness.reply_ok(&request);
    support::settle().await;
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, TransportEvent::Message(_))));
}

#[tokio::test]
async fn stream_forwards_messages_until_close() {
    let (transport, mut harness, mut events) = connect().await;

    let (uid, done) = transport
        .open_stream(RequestPayload::Interact(InteractParams::text("hello")))
        .expect("open_stream failed");

    let request = harness.next_request().await;
    assert_eq!(request["kind"], "interact");
    assert_eq!(request["type"], "stream");
    assert_eq!(request["uid"], json!(uid.to_string()));

    harness.interact_event(&request["uid"], "text", json!({"text": "hi there"}));
    harness.interact_event(&request["uid"], "interaction_complete", json!({}));
    support::settle().await;

    let forwarded = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, TransportEvent::Message(_)))
        .count();
    assert_eq!(forwarded, 2, "every stream message flows through");

    harness.inject(&json!({"uid": request["uid"], "kind": "close"}));
    done.await
        .expect("opener dropped")
        .expect("close resolves the stream");
}

#[tokio::test]
async fn stream_error_surfaces_without_rejecting_the_opener() {
    let (transport, mut harness, mut events) = connect().await;

    let (_uid, done) = transport
        .open_stream(RequestPayload::Interact(InteractParams::default()))
        .expect("open_stream failed");

    let request = harness.next_request().await;
    harness.inject(&json!({
        "uid": request["uid"],
        "kind": "error",
        "error": "utterance generation failed",
    }));

    done.await
        .expect("opener dropped")
        .expect("stream error must not reject the opener");

    support::settle().await;
    assert!(drain(&mut events).iter().any(
        |e| matches!(e, TransportEvent::TransportError { message } if message.contains("utterance"))
    ));
}

#[tokio::test]
async fn unmatched_interact_events_flow_through() {
    let (_transport, harness, mut events) = connect().await;

    // Server-initiated event for an interaction this client never
    // opened (e.g. replayed after a timeout): still forwarded.
    harness.inject(&json!({
        "uid": "9c7a1f2e-0b63-4a0f-8f7d-2f4f4f6a9b11",
        "kind": "interact",
        "event": "text",
        "text": "hello",
    }));
    // Unmatched non-interact messages are dropped.
    harness.inject(&json!({
        "uid": "9c7a1f2e-0b63-4a0f-8f7d-2f4f4f6a9b12",
        "kind": "ping",
    }));
    support::settle().await;

    let forwarded = drain(&mut events);
    assert_eq!(
        forwarded
            .iter()
            .filter(|e| matches!(e, TransportEvent::Message(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn every_request_carries_a_fresh_uid() {
    let (transport, mut harness, _events) = connect().await;

    let mut uids = std::collections::HashSet::new();
    for _ in 0..5 {
        transport
            .send_detached(RequestPayload::CheckTurn)
            .expect("send failed");
        let request = harness.next_request().await;
        assert!(uids.insert(request["uid"].as_str().unwrap().to_string()));
    }
    assert_eq!(uids.len(), 5);
}

#[tokio::test]
async fn disconnect_rejects_everything_pending() {
    let (transport, mut harness, mut events) = connect().await;

    let requester = transport.clone();
    let pending = tokio::spawn(async move { requester.request(RequestPayload::Ping).await });
    harness.next_request().await;

    transport.disconnect();
    let error = pending.await.unwrap().expect_err("pending must reject");
    assert!(matches!(error, ClientError::Channel(_)));

    support::settle().await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TransportEvent::Closed { clean: true })));
}

#[tokio::test]
async fn handshake_authenticates_then_configures() {
    let (transport, mut harness, mut events) = connect().await;

    let shaker = transport.clone();
    let handshake = tokio::spawn(async move {
        shaker
            .handshake(
                "bearer-abc".to_string(),
                SessionConfig {
                    prompt: Some("Be concise.".to_string()),
                    ..SessionConfig::default()
                },
            )
            .await
    });

    let auth = harness.next_request().await;
    assert_eq!(auth["kind"], "authenticate");
    assert_eq!(auth["access_token"], "bearer-abc");
    harness.reply_ok(&auth);

    let config = harness.next_request().await;
    assert_eq!(config["kind"], "set_configuration");
    assert_eq!(config["config"]["prompt"], "Be concise.");
    harness.reply_ok(&config);

    handshake.await.unwrap().expect("handshake failed");

    support::settle().await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TransportEvent::Connected)));
}
