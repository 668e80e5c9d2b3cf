/// Session lifecycle tests against an in-memory transport.
///
/// Covers subscription replay, heartbeat expiry, the reconnect budget and the
/// NotConnected contract without opening real sockets.
mod common;

use std::time::Duration;

use serde_json::json;

use common::{next_event, next_server, test_config, Event, FakeConnector, Plan, Recorder};
use reya_sdk::*;

fn subscribe_frame(path: &str) -> serde_json::Value {
    json!({"type": "subscribe", "channel": path, "batched": false})
}

#[tokio::test]
async fn test_subscribe_before_connect_then_unsubscribe_mid_session() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);

    session.market().summary("ETHRUSDPERP").subscribe(false).unwrap();
    session.wallet().positions("0xABC").subscribe(false).unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.subscription_count(), 2);

    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert!(handle.is_connected());

    assert_eq!(
        server.next_frame().await,
        subscribe_frame("/v2/market/ETHRUSDPERP/summary")
    );
    assert_eq!(
        server.next_frame().await,
        subscribe_frame("/v2/wallet/0xABC/positions")
    );

    handle.market().summary("ETHRUSDPERP").unsubscribe().unwrap();
    assert_eq!(
        server.next_frame().await,
        json!({"type": "unsubscribe", "channel": "/v2/market/ETHRUSDPERP/summary"})
    );
    assert_eq!(handle.subscription_count(), 1);
    assert_eq!(handle.subscriptions()[0].path(), "/v2/wallet/0xABC/positions");

    handle.close();
    assert!(task.await.unwrap().is_ok());
    assert!(
        server.drain().await.is_empty(),
        "No frames should follow the single unsubscribe"
    );
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_duplicate_subscribe_sends_one_frame() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);

    assert!(session.subscribe(Channel::new("/v2/prices/BTCRUSDPERP")));
    assert!(!session.subscribe(Channel::new("/v2/prices/BTCRUSDPERP")));
    assert_eq!(session.subscription_count(), 1);

    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert_eq!(server.next_frame().await, subscribe_frame("/v2/prices/BTCRUSDPERP"));

    // Again while Open: still nothing new on the wire.
    assert!(handle.prices().price("BTCRUSDPERP").is_subscribed().unwrap());
    handle.prices().price("BTCRUSDPERP").subscribe(true).unwrap();
    assert_eq!(handle.subscription_count(), 1);
    assert!(
        !handle.subscriptions()[0].is_batched(),
        "Re-subscribing should keep the original batched flag"
    );

    handle.close();
    task.await.unwrap().unwrap();
    assert!(server.drain().await.is_empty(), "Duplicate subscribe must not be sent");
}

#[test]
fn test_unsubscribe_absent_channel_is_noop() {
    let handle = SessionHandle::new();
    handle.subscribe(Channel::new("/v2/prices"));

    assert!(!handle.unsubscribe("/v2/prices/ETHRUSDPERP"));
    handle.prices().price("ETHRUSDPERP").unsubscribe().unwrap();

    assert_eq!(handle.subscription_count(), 1);
    assert_eq!(handle.subscriptions()[0].path(), "/v2/prices");
}

#[tokio::test]
async fn test_unsubscribe_absent_channel_while_open_sends_nothing() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    assert!(!handle.unsubscribe("/v2/wallet/0xABC/openOrders"));
    assert_eq!(handle.subscription_count(), 0);

    handle.close();
    task.await.unwrap().unwrap();
    assert!(server.drain().await.is_empty());
}

#[tokio::test]
async fn test_replay_after_drop_in_original_order() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept, Plan::Accept]);
    let counter = connector.clone();
    let session = ConnectionSession::with_connector(test_config(), connector);

    let paths = [
        "/v2/wallet/0xABC/positions",
        "/v2/prices/ETHRUSDPERP",
        "/v2/markets/summary",
    ];
    for path in paths {
        session.subscribe(Channel::new(path));
    }

    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut first = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    for path in paths {
        assert_eq!(first.next_frame().await, subscribe_frame(path));
    }

    // Confirmations, including a duplicate, feed the health gauge once per channel.
    for path in paths.iter().chain(std::iter::once(&paths[0])) {
        first.push(json!({"type": "subscribed", "channel": path}));
    }
    for _ in 0..4 {
        assert!(matches!(
            next_event(&mut events).await,
            Event::Message(InboundMessage::Subscribed(_))
        ));
    }
    assert_eq!(handle.active_subscriptions(), 3);

    // Simulate a network blip.
    drop(first);
    match next_event(&mut events).await {
        Event::Error { fatal, state, .. } => {
            assert!(!fatal, "A drop should not be fatal");
            assert_eq!(state, ConnectionState::Connecting);
        }
        other => panic!("Expected a drop error, got {other:?}"),
    }

    let mut second = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert_eq!(handle.active_subscriptions(), 0, "Confirmations reset per connection");
    for path in paths {
        assert_eq!(second.next_frame().await, subscribe_frame(path));
    }
    assert_eq!(handle.subscription_count(), 3);
    assert_eq!(counter.attempts(), 2);

    handle.close();
    task.await.unwrap().unwrap();
    assert!(second.drain().await.is_empty(), "Replay should send exactly three frames");
}

#[tokio::test]
async fn test_subscribe_while_open_is_sent_immediately() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.wallet().open_orders("0xABC").subscribe(true).unwrap();
    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "channel": "/v2/wallet/0xABC/openOrders", "batched": true})
    );

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_ping_is_answered_before_callback() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    server.push(json!({"type": "ping"}));
    assert!(matches!(
        next_event(&mut events).await,
        Event::Message(InboundMessage::Ping(_))
    ));
    assert_eq!(server.next_frame().await, json!({"type": "pong"}));

    handle.close();
    task.await.unwrap().unwrap();
    assert!(server.drain().await.is_empty(), "Exactly one pong per ping");
}

#[tokio::test]
async fn test_probe_ping_follows_replay() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let config = WebSocketConfig {
        probe_on_open: true,
        ..test_config()
    };
    let session = ConnectionSession::with_connector(config, connector);
    session.prices().all_prices().subscribe(false).unwrap();
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert_eq!(server.next_frame().await, subscribe_frame("/v2/prices"));
    assert_eq!(server.next_frame().await, json!({"type": "ping"}));

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bad_frames_do_not_end_session() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    server.push_raw("not json");
    server.push(json!({"type": "snapshot", "channel": "/v2/prices"}));
    server.push(json!({"type": "channel_data", "channel": "/v2/prices", "data": []}));

    match next_event(&mut events).await {
        Event::Error { message, fatal, .. } => {
            assert!(message.contains("Malformed frame"), "got {message}");
            assert!(!fatal);
        }
        other => panic!("Expected malformed frame error, got {other:?}"),
    }
    match next_event(&mut events).await {
        Event::Error { message, .. } => assert!(message.contains("snapshot"), "got {message}"),
        other => panic!("Expected unknown type error, got {other:?}"),
    }
    match next_event(&mut events).await {
        Event::Message(InboundMessage::Unhandled(m)) => {
            assert_eq!(m.message_type.as_deref(), Some("snapshot"));
            assert_eq!(m.raw["channel"], "/v2/prices");
        }
        other => panic!("Expected unhandled message, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        Event::Message(InboundMessage::ChannelData(_))
    ));
    assert!(handle.is_connected());

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreadable_frame_is_reported_without_dropping() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    server
        .inbound
        .send(Ok(TransportEvent::Invalid("binary frame is not UTF-8".into())))
        .unwrap();
    server.push(json!({"type": "pong"}));

    match next_event(&mut events).await {
        Event::Error { message, fatal, state } => {
            assert!(message.contains("Malformed frame"), "got {message}");
            assert!(!fatal);
            assert_eq!(state, ConnectionState::Open);
        }
        other => panic!("Expected malformed frame error, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        Event::Message(InboundMessage::Pong(_))
    ));
    assert!(handle.is_connected());

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_reconnect() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept, Plan::Accept]);
    let config = WebSocketConfig {
        ping_interval: Duration::from_secs(1),
        ping_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let session = ConnectionSession::with_connector(config, connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut first = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert_eq!(first.next_frame().await, json!({"type": "ping"}));

    // No pong: the session must drop the connection and go back to Connecting.
    match next_event(&mut events).await {
        Event::Error { message, state, .. } => {
            assert!(message.contains("Heartbeat timed out"), "got {message}");
            assert_eq!(state, ConnectionState::Connecting);
        }
        other => panic!("Expected heartbeat timeout, got {other:?}"),
    }

    let _second = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pong_keeps_connection_alive() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let config = WebSocketConfig {
        ping_interval: Duration::from_secs(1),
        ping_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let session = ConnectionSession::with_connector(config, connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    for _ in 0..3 {
        assert_eq!(server.next_frame().await, json!({"type": "ping"}));
        server.push(json!({"type": "pong"}));
        assert!(matches!(
            next_event(&mut events).await,
            Event::Message(InboundMessage::Pong(_))
        ));
    }
    assert!(handle.is_connected());

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transport_pong_counts_as_liveness() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let config = WebSocketConfig {
        ping_interval: Duration::from_secs(1),
        ping_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let session = ConnectionSession::with_connector(config, connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    assert_eq!(server.next_frame().await, json!({"type": "ping"}));
    server.inbound.send(Ok(TransportEvent::Pong)).unwrap();
    assert_eq!(server.next_frame().await, json!({"type": "ping"}));
    assert!(handle.is_connected());
    assert!(events.try_recv().is_err(), "No drop should have been reported");

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_budget_exhaustion() {
    let (connector, _servers) =
        FakeConnector::new(vec![Plan::Refuse, Plan::Refuse, Plan::Refuse, Plan::Accept]);
    let counter = connector.clone();
    let session = ConnectionSession::with_connector(test_config(), connector);
    session.wallet().positions("0xABC").subscribe(false).unwrap();
    let handle = session.handle();

    let (recorder, mut events) = Recorder::new();
    let result = session.connect(recorder).await;

    assert!(matches!(
        result,
        Err(ReyaError::ConnectionExhausted { attempts: 3 })
    ));
    assert_eq!(counter.attempts(), 3, "No attempt after the budget is spent");
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(
        handle.subscription_count(),
        1,
        "Registry survives exhaustion"
    );

    let mut drops = 0;
    let mut exhausted = 0;
    let mut closes = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Error { fatal: false, .. } => drops += 1,
            Event::Error { fatal: true, message, .. } => {
                assert!(message.contains("exhausted"), "got {message}");
                exhausted += 1;
            }
            Event::Close(reason) => closes.push(reason),
            other => panic!("Unexpected callback {other:?}"),
        }
    }
    assert_eq!(drops, 3);
    assert_eq!(exhausted, 1, "Exactly one ConnectionExhausted");
    assert_eq!(closes, vec![CloseReason::Exhausted { attempts: 3 }]);

    handle.close();
    assert_eq!(handle.subscription_count(), 0, "Close tears down an exhausted session");
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err(), "No callbacks after teardown");
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_enters_reconnect_policy() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Hang, Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    match next_event(&mut events).await {
        Event::Error { message, fatal, .. } => {
            assert!(message.contains("timed out"), "got {message}");
            assert!(!fatal);
        }
        other => panic!("Expected connection timeout, got {other:?}"),
    }
    let _server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failures_reset_after_successful_open() {
    let plan = vec![
        Plan::Refuse,
        Plan::Refuse,
        Plan::Accept,
        Plan::Refuse,
        Plan::Refuse,
        Plan::Accept,
    ];
    let (connector, mut servers) = FakeConnector::new(plan);
    let counter = connector.clone();
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, _events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let first = next_server(&mut servers).await;
    drop(first);
    let _second = next_server(&mut servers).await;
    assert_eq!(counter.attempts(), 6);

    handle.close();
    assert!(task.await.unwrap().is_ok());
}

#[test]
fn test_send_requires_open_session() {
    let handle = SessionHandle::new();
    let err = handle.send(r#"{"type":"ping"}"#).unwrap_err();
    assert!(matches!(
        err,
        ReyaError::NotConnected(ConnectionState::Disconnected)
    ));

    let err = handle.send_message(&OutboundMessage::Ping).unwrap_err();
    assert!(matches!(err, ReyaError::NotConnected(_)));
}

#[tokio::test]
async fn test_send_while_open_reaches_transport() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });

    let mut server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.send(r#"{"type":"ping"}"#).unwrap();
    assert_eq!(server.next_frame().await, json!({"type": "ping"}));

    handle.close();
    task.await.unwrap().unwrap();
    assert!(matches!(
        handle.send("{}"),
        Err(ReyaError::NotConnected(ConnectionState::Disconnected))
    ));
}

#[tokio::test]
async fn test_close_clears_registry_and_is_idempotent() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();

    // Closing a session that never ran only drops its subscriptions.
    session.prices().all_prices().subscribe(false).unwrap();
    handle.close();
    assert_eq!(handle.subscription_count(), 0);
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    session.prices().all_prices().subscribe(false).unwrap();
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn(async move { session.connect(recorder).await });
    let _server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.close();
    handle.close();
    assert!(task.await.unwrap().is_ok());
    assert!(matches!(
        next_event(&mut events).await,
        Event::Close(CloseReason::Requested)
    ));
    assert_eq!(handle.subscription_count(), 0);
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    handle.close();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_from_callback() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let task = tokio::spawn(async move {
        session
            .connect(|session: &SessionHandle, message: InboundMessage| {
                if let InboundMessage::Connected(_) = message {
                    session.close();
                }
            })
            .await
    });

    let server = next_server(&mut servers).await;
    server.push(json!({"type": "connected", "connection_id": "c-1"}));
    assert!(task.await.unwrap().is_ok());
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_connect_future_is_send() {
    // The production connector must yield a spawnable session loop too.
    let production = ConnectionSession::new(WebSocketConfig::default());
    let pending = production.connect(|_session: &SessionHandle, _message: InboundMessage| {});
    assert_send(&pending);
    drop(pending);

    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = ConnectionSession::with_connector(test_config(), connector);
    let handle = session.handle();
    let (recorder, mut events) = Recorder::new();
    let run = async move { session.connect(recorder).await };
    assert_send(&run);

    let task = tokio::spawn(run);
    let _server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    handle.close();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_connect_twice_is_invalid_state() {
    let (connector, mut servers) = FakeConnector::new(vec![Plan::Accept]);
    let session = std::sync::Arc::new(ConnectionSession::with_connector(test_config(), connector));
    let (recorder, mut events) = Recorder::new();
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.connect(recorder).await }
    });
    let _server = next_server(&mut servers).await;
    assert!(matches!(next_event(&mut events).await, Event::Open));

    let (second, _) = Recorder::new();
    let err = session.connect(second).await.unwrap_err();
    assert!(matches!(err, ReyaError::InvalidState(_)));

    session.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_attempt() {
    let (connector, _servers) = FakeConnector::new(vec![Plan::Accept]);
    let counter = connector.clone();
    let config = WebSocketConfig {
        url: "https://ws.reya.xyz/".into(),
        ..test_config()
    };
    let session = ConnectionSession::with_connector(config, connector);
    let (recorder, _events) = Recorder::new();

    let err = session.connect(recorder).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, ReyaError::InvalidConfig(_)));
    assert_eq!(counter.attempts(), 0);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
