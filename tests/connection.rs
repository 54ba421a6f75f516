//! Connection lifecycle against an in-memory venue.
//!
//! Every test runs on paused time, so backoff sleeps and heartbeat deadlines
//! elapse instantly once the runtime is idle.

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{envelope, init_tracing, next_matching, MockVenue, TEST_TIMEOUT};
use tokio_test::assert_ok;
use venue_session::error::ConnectionError;
use venue_session::router::{MessageRouter, SubscribeOptions};
use venue_session::shared::Channel;
use venue_session::ws::{
    ConnectionConfig, ConnectionEvent, ConnectionState, StaticToken, SubscribeParams,
    VenueConnection,
};

const URL: &str = "wss://venue.test/ws";

fn quiet_config() -> ConnectionConfig {
    // Heartbeats far enough apart that they never interfere.
    ConnectionConfig {
        heartbeat_interval_ms: 3_600_000,
        ..Default::default()
    }
}

fn connect(venue: &MockVenue, config: ConnectionConfig) -> VenueConnection {
    init_tracing();
    VenueConnection::builder("mock", URL)
        .config(config)
        .connector(venue.connector())
        .connect()
        .expect("connect should spawn")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_and_resets_after_success() {
    let venue = MockVenue::refusing();
    let conn = connect(&venue, quiet_config());
    let mut events = conn.events();

    for (attempt, delay_ms) in [(1, 1_000), (2, 2_000), (3, 4_000), (4, 8_000)] {
        let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { .. })).await;
        assert_eq!(ev, ConnectionEvent::Reconnecting { attempt, delay_ms });
    }
    assert_eq!(conn.state(), ConnectionState::Reconnecting);

    venue.set_refusing(false);
    let server = venue.accept().await;
    next_matching(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(venue.attempts(), 5);

    // Stream ends: the backoff starts over from the base delay.
    drop(server);
    let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { .. })).await;
    assert_eq!(
        ev,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            delay_ms: 1_000
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_resubscribe_and_replay_in_order() {
    let venue = MockVenue::refusing();
    let conn = VenueConnection::builder("mock", URL)
        .config(quiet_config())
        .connector(venue.connector())
        .credentials(Arc::new(StaticToken("secret".into())))
        .connect()
        .unwrap();
    let mut events = conn.events();

    assert_ok!(conn.subscribe(SubscribeParams::channel(Channel::OrderBook)));
    conn.publish(Channel::MarketData, json!({"n": 1})).unwrap();
    conn.publish(Channel::MarketData, json!({"n": 2})).unwrap();

    next_matching(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { .. })).await;
    venue.set_refusing(false);

    let mut server = venue.accept().await;
    assert_eq!(server.recv().await, json!({"type": "auth", "token": "secret"}));

    let sub = server.recv().await;
    assert_eq!(sub["type"], "subscribe");
    assert_eq!(sub["params"]["channel"], "ORDER_BOOK");

    for n in [1, 2] {
        let publish = server.recv().await;
        assert_eq!(publish["type"], "publish");
        assert_eq!(publish["channel"], "MARKET_DATA");
        assert_eq!(publish["data"]["n"], n);
    }
    assert_eq!(conn.dropped_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_replayed_after_reconnect() {
    let venue = MockVenue::new();
    let conn = connect(&venue, quiet_config());
    let mut events = conn.events();

    let mut server = venue.accept().await;
    conn.subscribe(SubscribeParams::channel(Channel::TradeUpdate)).unwrap();
    assert_eq!(server.recv().await["params"]["channel"], "TRADE_UPDATE");

    server.close(1011, "restarting");
    let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(
        ev,
        ConnectionEvent::Disconnected {
            code: Some(1011),
            reason: "restarting".into()
        }
    );

    let mut server = venue.accept().await;
    let sub = server.recv().await;
    assert_eq!(sub["type"], "subscribe");
    assert_eq!(sub["params"]["channel"], "TRADE_UPDATE");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_ack_updates_health() {
    let venue = MockVenue::new();
    let config = ConnectionConfig {
        heartbeat_interval_ms: 1_000,
        heartbeat_timeout_ms: 500,
        ..Default::default()
    };
    let conn = connect(&venue, config);
    let mut server = venue.accept().await;

    let hb = server.recv_any().await;
    assert_eq!(hb["type"], "heartbeat");
    assert_eq!(hb["nonce"], 1);
    server.ack_heartbeat(&hb, 1);

    let next = server.recv_any().await;
    assert_eq!(next["nonce"], 2);
    let health = conn.health();
    assert!(health.latency_ms.is_some());
    assert!(health.last_heartbeat_at.is_some());
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_missing_heartbeat_ack_drops_connection() {
    let venue = MockVenue::new();
    let config = ConnectionConfig {
        heartbeat_interval_ms: 1_000,
        heartbeat_timeout_ms: 500,
        ..Default::default()
    };
    let conn = connect(&venue, config);
    let mut events = conn.events();
    let _server = venue.accept().await;

    let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(
        ev,
        ConnectionEvent::Disconnected {
            code: None,
            reason: "Heartbeat timeout".into()
        }
    );

    next_matching(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { attempt: 1, .. })).await;
    assert_eq!(
        conn.status().last_error,
        Some(ConnectionError::HeartbeatTimeout(500))
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_auth_rejection_fails_until_reconnect() {
    let venue = MockVenue::new();
    let config = ConnectionConfig {
        max_auth_failures: 3,
        ..quiet_config()
    };
    let conn = VenueConnection::builder("mock", URL)
        .config(config)
        .connector(venue.connector())
        .credentials(Arc::new(StaticToken("expired".into())))
        .connect()
        .unwrap();
    let mut events = conn.events();

    for seq in 1..=3 {
        let mut server = venue.accept().await;
        assert_eq!(server.recv().await["type"], "auth");
        server.send(envelope(
            "error",
            "ERROR",
            seq,
            0,
            json!({"code": "AUTH_FAILED", "message": "token expired"}),
        ));
    }

    let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Failed { .. })).await;
    match ev {
        ConnectionEvent::Failed { reason } => assert!(reason.contains("token expired"), "{reason}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(venue.attempts(), 3);

    // Failed parks the task until the caller asks again.
    assert_ok!(conn.reconnect());
    let mut server = venue.accept().await;
    assert_eq!(server.recv().await["type"], "auth");
    assert_eq!(venue.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_reconnect_attempts() {
    let venue = MockVenue::refusing();
    let config = ConnectionConfig {
        max_reconnect_attempts: 2,
        ..quiet_config()
    };
    let conn = connect(&venue, config);
    let mut events = conn.events();

    let ev = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Failed { .. })).await;
    match ev {
        ConnectionEvent::Failed { reason } => assert!(reason.contains("gave up after 2")),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(venue.attempts(), 3);
    assert_eq!(conn.state(), ConnectionState::Failed);

    venue.set_refusing(false);
    assert_ok!(conn.reconnect());
    let _server = venue.accept().await;
    next_matching(&mut events, |e| *e == ConnectionEvent::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_reach_router_in_order() {
    let venue = MockVenue::new();
    let router = MessageRouter::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = router.subscribe(
        Channel::OrderBook,
        move |env| {
            let _ = tx.send(env.sequence);
            Ok(())
        },
        SubscribeOptions::new(),
    );

    let conn = VenueConnection::builder("mock", URL)
        .config(quiet_config())
        .connector(venue.connector())
        .router(router.clone())
        .connect()
        .unwrap();
    let mut events = conn.events();
    let server = venue.accept().await;

    let data = json!({"trading_pair": "BTC-USD", "bids": [], "asks": []});
    for seq in [1, 2, 2, 3] {
        server.send(envelope("delta", "ORDER_BOOK", seq, 1_000, data.clone()));
    }
    server.send_raw("{not json");

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let seq = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        seen.push(seq);
    }
    assert_eq!(seen, vec![1, 2, 3]);

    next_matching(&mut events, |e| matches!(e, ConnectionEvent::Diagnostic(_))).await;
    let stats = conn.router().stats();
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.delivered, 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_sends_close() {
    let venue = MockVenue::new();
    let conn = connect(&venue, quiet_config());
    let mut server = venue.accept().await;
    conn.wait_for_state(ConnectionState::Connected).await.unwrap();

    conn.disconnect().await;
    let close = server.recv().await;
    assert_eq!(close["type"], "close");
    assert_eq!(close["code"], 1000);
}
