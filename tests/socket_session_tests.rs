//! Connection manager behavior: admission limits, room routing, broadcast
//! backpressure, and idempotent teardown.

use gateway_core::auth::Principal;
use gateway_core::config::SocketConfig;
use gateway_core::observability::GatewayMetrics;
use gateway_core::socket::{ConnectionHub, DisconnectReason, Frame, MessageType, Session};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn hub(config: SocketConfig) -> Arc<ConnectionHub> {
    let metrics = Arc::new(GatewayMetrics::new(&prometheus::Registry::new()).unwrap());
    Arc::new(ConnectionHub::new(config, metrics))
}

fn principal(user_id: &str) -> Principal {
    Principal {
        user_id: user_id.to_string(),
        email: None,
        roles: HashSet::new(),
        resource_roles: HashMap::new(),
        groups: HashSet::new(),
    }
}

fn frame(json: &str) -> Frame {
    serde_json::from_str(json).unwrap()
}

/// Drains everything currently sitting in a session's outbound queue.
fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(f) = rx.try_recv() {
        frames.push(f);
    }
    frames
}

#[tokio::test]
async fn admit_queues_welcome_before_returning() {
    let hub = hub(SocketConfig::default());
    let (_session, mut rx) = hub.admit(principal("alice")).await.unwrap();
    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, MessageType::Welcome);
}

#[tokio::test]
async fn global_limit_rejects_without_creating_a_session() {
    let config = SocketConfig {
        max_connections: 2,
        ..SocketConfig::default()
    };
    let hub = hub(config);
    let _a = hub.admit(principal("a")).await.unwrap();
    let _b = hub.admit(principal("b")).await.unwrap();

    let err = hub.admit(principal("c")).await.unwrap_err();
    assert_eq!(err.code().as_str(), "CONNECTION_LIMIT_REACHED");
    assert_eq!(hub.session_count().await, 2);
}

#[tokio::test]
async fn per_user_limit_is_distinct_from_global() {
    let config = SocketConfig {
        max_connections_per_user: 1,
        ..SocketConfig::default()
    };
    let hub = hub(config);
    let _first = hub.admit(principal("alice")).await.unwrap();

    let err = hub.admit(principal("alice")).await.unwrap_err();
    assert_eq!(err.code().as_str(), "USER_CONNECTION_LIMIT");
    // A different user is still admitted.
    assert!(hub.admit(principal("bob")).await.is_ok());
}

#[tokio::test]
async fn chat_to_joined_room_reaches_all_members() {
    let hub = hub(SocketConfig::default());
    let (alice, mut rx_a) = hub.admit(principal("alice")).await.unwrap();
    let (bob, mut rx_b) = hub.admit(principal("bob")).await.unwrap();

    hub.handle_frame(&alice, frame(r#"{"type":"join_room","room_id":"R1"}"#))
        .await;
    hub.handle_frame(&bob, frame(r#"{"type":"join_room","room_id":"R1"}"#))
        .await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    hub.handle_frame(
        &alice,
        frame(r#"{"type":"chat_message","room_id":"R1","content":"hello"}"#),
    )
    .await;

    let to_bob = drain(&mut rx_b);
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0].kind, MessageType::ChatMessage);
    assert_eq!(to_bob[0].user_id.as_deref(), Some("alice"));
    // The sender receives its own chat message back.
    let to_alice = drain(&mut rx_a);
    assert_eq!(to_alice.len(), 1);
}

#[tokio::test]
async fn chat_without_membership_fails_without_crashing_the_session() {
    let hub = hub(SocketConfig::default());
    let (alice, mut rx_a) = hub.admit(principal("alice")).await.unwrap();
    drain(&mut rx_a);

    hub.handle_frame(&alice, frame(r#"{"type":"join_room","room_id":"R1"}"#))
        .await;
    drain(&mut rx_a);

    hub.handle_frame(
        &alice,
        frame(r#"{"type":"chat_message","room_id":"R2","content":"oops"}"#),
    )
    .await;

    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, MessageType::Error);
    let code = frames[0].content.as_ref().unwrap()["code"].as_str().unwrap();
    assert_eq!(code, "PERMISSION_DENIED");
    // Session survives; the joined room still works.
    assert!(alice.is_connected());
    assert_eq!(hub.session_count().await, 1);
}

#[tokio::test]
async fn unknown_message_type_is_ignored() {
    let hub = hub(SocketConfig::default());
    let (alice, mut rx_a) = hub.admit(principal("alice")).await.unwrap();
    drain(&mut rx_a);

    hub.handle_frame(&alice, frame(r#"{"type":"emoji_blast"}"#)).await;
    assert!(drain(&mut rx_a).is_empty());
    assert!(alice.is_connected());
}

#[tokio::test]
async fn concurrent_double_disconnect_broadcasts_member_left_once() {
    let hub = hub(SocketConfig::default());
    let (alice, mut rx_a) = hub.admit(principal("alice")).await.unwrap();
    let (bob, mut rx_b) = hub.admit(principal("bob")).await.unwrap();

    hub.handle_frame(&alice, frame(r#"{"type":"join_room","room_id":"R1"}"#))
        .await;
    hub.handle_frame(&bob, frame(r#"{"type":"join_room","room_id":"R1"}"#))
        .await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    tokio::join!(
        hub.disconnect(&alice, DisconnectReason::Client),
        hub.disconnect(&alice, DisconnectReason::ReadError),
    );

    let frames = drain(&mut rx_b);
    assert!(frames.iter().all(|f| f.kind == MessageType::MemberLeft));
    assert_eq!(frames.len(), 1, "member_left must be broadcast exactly once");
    assert_eq!(hub.session_count().await, 1);
    assert!(!alice.is_connected());
}

#[tokio::test]
async fn broadcast_skips_only_the_full_member() {
    let config = SocketConfig {
        outbound_queue_capacity: 2,
        ..SocketConfig::default()
    };
    let hub = hub(config);
    let (alice, mut rx_a) = hub.admit(principal("alice")).await.unwrap();
    let (bob, _rx_b) = hub.admit(principal("bob")).await.unwrap();
    let (carol, mut rx_c) = hub.admit(principal("carol")).await.unwrap();

    for s in [&alice, &bob, &carol] {
        hub.handle_frame(s, frame(r#"{"type":"join_room","room_id":"R1"}"#))
            .await;
    }
    drain(&mut rx_a);
    drain(&mut rx_c);
    // Fill bob's queue to capacity without draining it.
    while bob.try_enqueue(Frame::pong()).is_ok() {}

    let delivered = hub
        .broadcast("R1", Frame::chat("R1", "system", "hi".into()), None)
        .await;
    assert_eq!(delivered, 2, "slow member is skipped, others delivered");
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_c).len(), 1);
}

#[tokio::test]
async fn ping_on_full_queue_disconnects_for_overflow() {
    let config = SocketConfig {
        outbound_queue_capacity: 1,
        ..SocketConfig::default()
    };
    let hub = hub(config);
    // The welcome frame already fills the capacity-1 queue.
    let (alice, _rx) = hub.admit(principal("alice")).await.unwrap();

    hub.handle_frame(&alice, frame(r#"{"type":"ping"}"#)).await;
    assert!(!alice.is_connected());
    assert_eq!(hub.session_count().await, 0);
}

#[tokio::test]
async fn send_to_unresponsive_peer_disconnects_it() {
    let config = SocketConfig {
        outbound_queue_capacity: 1,
        send_timeout: Duration::from_millis(50),
        ..SocketConfig::default()
    };
    let hub = hub(config);
    // The welcome frame already fills the capacity-1 queue, and nothing
    // drains it.
    let (alice, _rx) = hub.admit(principal("alice")).await.unwrap();

    let err = hub.send_to(&alice, Frame::pong()).await.unwrap_err();
    assert_eq!(err.code().as_str(), "SEND_TIMEOUT");
    assert!(!alice.is_connected());
    assert!(alice.cancel_token().is_cancelled());
    assert_eq!(hub.session_count().await, 0);
}

#[tokio::test]
async fn sweeper_disconnects_idle_sessions() {
    let config = SocketConfig {
        pong_timeout: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(40),
        ping_period: Duration::from_millis(50),
        ..SocketConfig::default()
    };
    let hub = hub(config);
    let (_session, _rx) = hub.admit(principal("alice")).await.unwrap();

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(hub.clone().run_sweeper(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(hub.session_count().await, 0);

    cancel.cancel();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let hub = hub(SocketConfig::default());
    let sessions: Vec<(Arc<Session>, mpsc::Receiver<Frame>)> = {
        let mut out = Vec::new();
        for user in ["a", "b", "c"] {
            out.push(hub.admit(principal(user)).await.unwrap());
        }
        out
    };
    assert_eq!(hub.session_count().await, 3);

    hub.shutdown_all().await;
    assert_eq!(hub.session_count().await, 0);
    for (session, _) in &sessions {
        assert!(!session.is_connected());
        assert!(session.cancel_token().is_cancelled());
    }
}
