//! Connection Lifecycle Integration Tests
//!
//! Drives the connection manager against the in-memory transport with the
//! tokio clock paused, so backoff and heartbeat timings are exact.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use quote_stream_hub::application::ports::{InboundMessage, InboundSink, TopicSubscriber};
use quote_stream_hub::domain::chart::seoul_offset;
use quote_stream_hub::infrastructure::stream::{
    ConnectionConfig, ConnectionManager, HeartbeatConfig, MemoryPeer, MemoryServer, MemoryTransport,
    ReconnectConfig, StompCommand, StompFrame, StreamCodec, SubscriptionEvent, SubscriptionStatus,
};
use quote_stream_hub::{ConnectionState, Topic, TopicLayout};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<InboundMessage>>,
    states: Mutex<Vec<ConnectionState>>,
}

impl RecordingSink {
    fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    fn count(&self, state: ConnectionState) -> usize {
        self.states.lock().iter().filter(|s| **s == state).count()
    }
}

impl InboundSink for RecordingSink {
    fn on_message(&self, message: InboundMessage) {
        self.messages.lock().push(message);
    }

    fn on_state_change(&self, _previous: ConnectionState, current: ConnectionState) {
        self.states.lock().push(current);
    }
}

struct Harness {
    manager: Arc<ConnectionManager>,
    transport: MemoryTransport,
    server: MemoryServer,
    sink: Arc<RecordingSink>,
}

fn harness(configure: impl FnOnce(&mut ConnectionConfig)) -> Harness {
    let (transport, server) = MemoryTransport::new();
    let sink = Arc::new(RecordingSink::default());
    let mut config = ConnectionConfig::new("ws://quotes.test/ws");
    configure(&mut config);
    let manager = Arc::new(ConnectionManager::new(
        config,
        Arc::new(transport.clone()),
        StreamCodec::new(TopicLayout::default(), seoul_offset()),
        sink.clone(),
    ));
    Harness {
        manager,
        transport,
        server,
        sink,
    }
}

async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .unwrap();
}

async fn expect_subscribe(peer: &mut MemoryPeer) -> StompFrame {
    let frame = peer.next_frame().await.unwrap();
    assert_eq!(frame.command, StompCommand::Subscribe);
    frame
}

// =============================================================================
// Backoff
// =============================================================================

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_parks_in_error() {
    let h = harness(|config| {
        config.reconnect = ReconnectConfig {
            max_attempts: 3,
            ..ReconnectConfig::default()
        };
    });
    h.transport.refuse_next(10);

    let started = Instant::now();
    h.manager.connect();

    // First attempt plus three retries after 1s, 2s and 4s.
    while !(h.transport.open_attempts() == 4 && h.manager.state() == ConnectionState::Error) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    assert_eq!(h.sink.count(ConnectionState::Reconnecting), 3);

    // Terminal: no further attempts.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.transport.open_attempts(), 4);
    assert_eq!(h.manager.state(), ConnectionState::Error);

    // An explicit connect starts over from attempt zero.
    h.manager.connect();
    assert_eq!(h.manager.stats().reconnect_attempts, 0);
    assert_eq!(h.manager.stats().current_backoff_ms, None);

    let restarted = Instant::now();
    let mut delays = Vec::new();
    let mut seen = 0;
    while !(h.transport.open_attempts() == 8 && h.manager.state() == ConnectionState::Error) {
        let stats = h.manager.stats();
        if stats.reconnect_attempts > seen {
            seen = stats.reconnect_attempts;
            delays.push(stats.current_backoff_ms.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(h.transport.open_attempts() > 4);
    assert_eq!(delays, vec![1_000, 2_000, 4_000]);
    let elapsed = restarted.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    assert_eq!(h.sink.count(ConnectionState::Reconnecting), 6);
}

#[tokio::test(start_paused = true)]
async fn successful_handshake_resets_backoff() {
    let mut h = harness(|_| {});
    h.transport.refuse_next(2);

    h.manager.connect();
    let peer = h.server.accept_session().await;
    // Two refused opens never reach the server.
    assert!(peer.is_some());
    wait_for(&h.manager, ConnectionState::Connected).await;

    let stats = h.manager.stats();
    assert_eq!(stats.reconnect_attempts, 0);
    assert_eq!(h.transport.open_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_stops_reconnecting() {
    let h = harness(|_| {});
    h.transport.refuse_next(10);

    h.manager.connect();
    wait_for(&h.manager, ConnectionState::Reconnecting).await;
    h.manager.disconnect();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.open_attempts(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
}

// =============================================================================
// Session Loss
// =============================================================================

#[tokio::test(start_paused = true)]
async fn server_close_reconnects_and_restores_subscriptions() {
    let mut h = harness(|_| {});
    h.manager.subscribe(&Topic::new("/topic/stocks/005930"));
    h.manager.subscribe(&Topic::new("/topic/stocks/000660"));

    h.manager.connect();
    let mut peer = h.server.accept_session().await.unwrap();
    let first = [expect_subscribe(&mut peer).await, expect_subscribe(&mut peer).await];
    assert_eq!(h.manager.stats().active_topics, 2);

    peer.close();
    let mut peer = h.server.accept_session().await.unwrap();
    let second = [expect_subscribe(&mut peer).await, expect_subscribe(&mut peer).await];

    // Same ids on the new session.
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.get("id"), b.get("id"));
        assert_eq!(a.get("destination"), b.get("destination"));
    }

    let states = h.sink.states();
    let closed_at = states
        .iter()
        .position(|s| *s == ConnectionState::Disconnected)
        .unwrap();
    assert_eq!(states[closed_at + 1], ConnectionState::Reconnecting);
    wait_for(&h.manager, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn read_error_moves_through_error_to_reconnecting() {
    let mut h = harness(|_| {});
    h.manager.connect();
    let peer = h.server.accept_session().await.unwrap();
    wait_for(&h.manager, ConnectionState::Connected).await;

    peer.fail("reset by peer");
    wait_for(&h.manager, ConnectionState::Reconnecting).await;

    let states = h.sink.states();
    assert_eq!(
        &states[states.len() - 2..],
        &[ConnectionState::Error, ConnectionState::Reconnecting]
    );
}

#[tokio::test(start_paused = true)]
async fn silent_handshake_times_out() {
    let mut h = harness(|config| config.handshake_timeout = Duration::from_secs(10));
    h.manager.connect();

    let started = Instant::now();
    let mut peer = h.server.accept().await.unwrap();
    let connect = peer.next_frame().await.unwrap();
    assert_eq!(connect.command, StompCommand::Connect);
    assert_eq!(connect.get("host"), Some("quotes.test"));

    wait_for(&h.manager, ConnectionState::Reconnecting).await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(h.sink.states().contains(&ConnectionState::Error));
}

// =============================================================================
// Heartbeat
// =============================================================================

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_then_times_out_on_silence() {
    let mut h = harness(|config| {
        config.heartbeat = HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        };
    });
    h.manager.connect();
    let peer = h.server.accept_session().await.unwrap();
    wait_for(&h.manager, ConnectionState::Connected).await;
    let connected_at = Instant::now();

    wait_for(&h.manager, ConnectionState::Reconnecting).await;

    assert!(peer.pings() >= 3);
    assert!(connected_at.elapsed() > Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn server_traffic_keeps_session_alive() {
    let mut h = harness(|config| {
        config.heartbeat = HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        };
    });
    h.manager.connect();
    let peer = h.server.accept_session().await.unwrap();
    wait_for(&h.manager, ConnectionState::Connected).await;

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        peer.pong();
    }

    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert!(peer.pings() >= 10);
}

#[tokio::test(start_paused = true)]
async fn advertised_heart_beats_are_sent_as_stomp_frames() {
    let mut h = harness(|config| {
        config.heartbeat = HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        };
    });
    h.manager.connect();
    let mut peer = h.server.accept().await.unwrap();
    let connect = peer.next_frame().await.unwrap();
    assert_eq!(connect.command, StompCommand::Connect);
    assert_eq!(connect.get("heart-beat"), Some("10000,30000"));
    peer.send_frame(&StompFrame::new(StompCommand::Connected).header("version", "1.2"));
    wait_for(&h.manager, ConnectionState::Connected).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        peer.pong();
    }

    assert!(peer.drain_frames().is_empty());
    assert!(peer.heart_beats() >= 5, "heart-beats {}", peer.heart_beats());
    assert_eq!(peer.heart_beats(), peer.pings());
    assert_eq!(h.manager.state(), ConnectionState::Connected);
}

// =============================================================================
// Topic Retry
// =============================================================================

fn rejection(destination: &str) -> StompFrame {
    StompFrame::new(StompCommand::Error)
        .header("destination", destination)
        .header("message", "subscription rejected")
}

#[tokio::test(start_paused = true)]
async fn rejected_topic_retries_linearly_then_fails() {
    let mut h = harness(|_| {});
    let topic = Topic::new("/topic/stocks/005930");
    h.manager.subscribe(&topic);
    let mut events = h.manager.subscription_events();

    h.manager.connect();
    let mut peer = h.server.accept_session().await.unwrap();
    let original = expect_subscribe(&mut peer).await;

    let mut delays = Vec::new();
    for _ in 0..3 {
        peer.send_frame(&rejection(topic.as_str()));
        let resent = expect_subscribe(&mut peer).await;
        assert_eq!(resent.get("id"), original.get("id"));
    }
    peer.send_frame(&rejection(topic.as_str()));

    loop {
        match events.recv().await.unwrap() {
            SubscriptionEvent::Retrying { delay, .. } => delays.push(delay),
            SubscriptionEvent::Failed(failed) => {
                assert_eq!(failed, topic);
                break;
            }
            SubscriptionEvent::Active(_) => {}
        }
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3)
        ]
    );
    let state = h.manager.subscription(&topic).unwrap();
    assert_eq!(state.status, SubscriptionStatus::Failed);
    assert!(!h.manager.is_subscribed(&topic));
    // A topic failure leaves the session up.
    assert_eq!(h.manager.state(), ConnectionState::Connected);

    // Explicit re-subscribe starts over.
    h.manager.subscribe(&topic);
    let again = expect_subscribe(&mut peer).await;
    assert_eq!(again.get("destination"), Some(topic.as_str()));
    assert_eq!(h.manager.subscription(&topic).unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn priority_topic_uses_its_own_schedule() {
    let layout = TopicLayout::default();
    let priority = layout.featured_challenge();
    let mut h = harness(|config| config.priority_topic = Some(layout.featured_challenge()));
    h.manager.subscribe(&priority);
    let mut events = h.manager.subscription_events();

    h.manager.connect();
    let mut peer = h.server.accept_session().await.unwrap();
    let frame = expect_subscribe(&mut peer).await;

    // Rejection addressed by subscription id rather than destination.
    peer.send_frame(
        &StompFrame::new(StompCommand::Error)
            .header("subscription", frame.get("id").unwrap())
            .header("message", "not yet"),
    );

    let retry = loop {
        if let SubscriptionEvent::Retrying { attempt, delay, .. } = events.recv().await.unwrap() {
            break (attempt, delay);
        }
    };
    assert_eq!(retry, (1, Duration::from_secs(5)));

    let started = Instant::now();
    expect_subscribe(&mut peer).await;
    assert!(started.elapsed() >= Duration::from_secs(5));
}

// =============================================================================
// Subscription Registry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn live_subscribe_is_sent_once() {
    let mut h = harness(|_| {});
    h.manager.connect();
    let mut peer = h.server.accept_session().await.unwrap();
    wait_for(&h.manager, ConnectionState::Connected).await;

    let topic = Topic::new("/topic/stocks/035720");
    h.manager.subscribe(&topic);
    h.manager.subscribe(&topic);
    h.manager.subscribe(&topic);

    expect_subscribe(&mut peer).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let extra: Vec<_> = peer
        .drain_frames()
        .into_iter()
        .filter(|f| f.command == StompCommand::Subscribe)
        .collect();
    assert!(extra.is_empty());

    h.manager.unsubscribe(&topic);
    let frame = peer.next_frame().await.unwrap();
    assert_eq!(frame.command, StompCommand::Unsubscribe);
    assert!(h.manager.subscription(&topic).is_none());
}

#[tokio::test(start_paused = true)]
async fn messages_reach_the_sink() {
    let mut h = harness(|_| {});
    h.manager.connect();
    let peer = h.server.accept_session().await.unwrap();
    wait_for(&h.manager, ConnectionState::Connected).await;

    peer.publish(
        "/topic/stocks/all",
        r#"[{"code":"005930","tradePrice":75000},{"code":"000660","tradePrice":120000}]"#,
    );

    while h.sink.messages.lock().len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let messages = h.sink.messages.lock().clone();
    assert!(matches!(&messages[0], InboundMessage::Quote(q) if q.instrument_id == "005930"));
}
