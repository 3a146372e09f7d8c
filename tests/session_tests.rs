// ABOUTME: Integration tests for the TransportSession state machine
// ABOUTME: Drives full sessions against the scriptable MockTransport

use burble::testing::MockTransport;
use burble::{
    Capability, DeliveryMode, Message, SessionConfig, SessionEvent, SessionState, Topic,
    TransportSession, WireMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn config() -> SessionConfig {
    let mut config = SessionConfig::new("/chat/1/inbound/proto", "/chat/1/outbound/proto");
    config.auto_reply = false;
    config
}

fn wire(text: &str, timestamp: i64) -> WireMessage {
    WireMessage::from_message(&Message::new(
        text.as_bytes().to_vec(),
        timestamp,
        Topic::new("/chat/1/inbound/proto"),
    ))
}

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn expect_state(rx: &mut mpsc::Receiver<SessionEvent>, expected: SessionState) {
    match next_event(rx).await {
        SessionEvent::State(state) => assert_eq!(state, expected),
        other => panic!("expected state {:?}, got {:?}", expected, other),
    }
}

async fn expect_message(rx: &mut mpsc::Receiver<SessionEvent>, payload: &[u8]) {
    match next_event(rx).await {
        SessionEvent::Message(msg) => assert_eq!(msg.payload, payload),
        other => panic!("expected message {:?}, got {:?}", payload, other),
    }
}

/// Spin until a condition holds, letting paused time auto-advance.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_state_sequence() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    assert_eq!(session.state(), SessionState::Disconnected);
    session.start().await;

    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    assert_eq!(session.state(), SessionState::Connected);

    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.acquires(), 1);
    assert_eq!(transport.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_start_is_noop() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    session.start().await;
    session.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.acquires(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_failure_retries_after_backoff() {
    let transport = Arc::new(MockTransport::new().fail_acquires(1));
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Error).await;
    // Fixed 2000 ms backoff, then a fresh attempt that succeeds
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_capability_is_fatal_to_attempt_not_process() {
    let transport = Arc::new(MockTransport::new().without_capability(Capability::Subscribe));
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Error).await;
    // Keeps retrying, never reaches Connected
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Error).await;

    session.stop().await;
    // Every acquired handle was released despite the failed checks
    assert_eq!(transport.acquires(), transport.releases());
}

#[tokio::test(start_paused = true)]
async fn test_subscription_failure_goes_to_error() {
    let transport = Arc::new(MockTransport::new().fail_subscribes(1));
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Error).await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_cancels_scheduled_retry() {
    let transport = Arc::new(MockTransport::new().fail_acquires(usize::MAX));
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Error).await;

    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);

    // The scheduled retry must not fire: no further attempts however far
    // time advances, and no further events.
    let drained = {
        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        count
    };
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(drained, 0, "no events should be buffered past stop");
}

#[tokio::test(start_paused = true)]
async fn test_no_events_after_stop() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    session.stop().await;
    session.stop().await; // idempotent

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_push_delivery_dedups_redelivered_messages() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    transport.push(wire("a", 100)).await;
    expect_message(&mut events, b"a").await;

    // Same identity key redelivered: dropped
    transport.push(wire("a", 100)).await;
    // Same timestamp, different payload: novel
    transport.push(wire("b", 100)).await;
    expect_message(&mut events, b"b").await;

    // And the first message is still a duplicate
    transport.push(wire("a", 100)).await;
    transport.push(wire("c", 101)).await;
    expect_message(&mut events, b"c").await;

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_peers_triggers_reconnect() {
    let transport = Arc::new(MockTransport::new().peer_counts([0]));
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    // First sample (1 s in) sees zero peers; the session reconnects and the
    // drained script falls back to healthy counts.
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    assert_eq!(transport.acquires(), 2);

    session.stop().await;
    assert_eq!(transport.releases(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_peer_query_failure_is_not_link_loss() {
    let transport = Arc::new(MockTransport::new().peer_count_error().peer_count_error());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    // Ride through several failed sample cycles without reconnecting
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(transport.acquires(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_subscription_triggers_reconnect() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    assert_eq!(transport.subscribes(), 1);

    transport.close_push();
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    assert_eq!(transport.subscribes(), 2);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_dedup_survives_reconnect() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    transport.push(wire("a", 100)).await;
    expect_message(&mut events, b"a").await;

    transport.close_push();
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    // Redelivery through the fresh subscription is still a duplicate
    transport.push(wire("a", 100)).await;
    transport.push(wire("d", 200)).await;
    expect_message(&mut events, b"d").await;

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_mode_filters_overlapping_windows_in_order() {
    let transport = Arc::new(MockTransport::new());
    transport.enqueue_fetch(vec![wire("a", 1), wire("b", 2)]);
    transport.enqueue_fetch(vec![wire("b", 2), wire("c", 3)]);

    let mut poll_config = config();
    poll_config.delivery = DeliveryMode::Poll;
    let session = TransportSession::new(Arc::clone(&transport), poll_config).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    expect_message(&mut events, b"a").await;
    expect_message(&mut events, b"b").await;
    // Second window re-fetches b; only c survives dedup
    expect_message(&mut events, b"c").await;

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_announce_published_on_connect() {
    let transport = Arc::new(MockTransport::new());
    let mut announce_config = config();
    announce_config.announce = Some("Server is online".to_string());
    let session = TransportSession::new(Arc::clone(&transport), announce_config).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;

    let probe = Arc::clone(&transport);
    wait_until(move || !probe.published().is_empty()).await;
    let published = transport.published();
    assert_eq!(published[0].0.as_str(), "/chat/1/outbound/proto");
    assert_eq!(published[0].1, b"Server is online");

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let transport = Arc::new(MockTransport::new());
    let session = TransportSession::new(Arc::clone(&transport), config()).unwrap();
    let mut events = session.take_events().unwrap();

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);

    session.start().await;
    expect_state(&mut events, SessionState::Connecting).await;
    expect_state(&mut events, SessionState::Connected).await;
    assert_eq!(transport.acquires(), 2);

    session.stop().await;
}

#[tokio::test]
async fn test_rejects_equal_topics() {
    let transport = Arc::new(MockTransport::new());
    let config = SessionConfig::new("/same", "/same");
    assert!(TransportSession::new(transport, config).is_err());
}
