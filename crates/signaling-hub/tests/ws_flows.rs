//! End-to-end WebSocket flows against a live hub instance.
//!
//! Each test binds the signaling router on an ephemeral port and drives
//! it with real WebSocket clients.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use signaling_hub::actors::{HubMetrics, RoomRegistryActorHandle, RoomSettings};
use signaling_hub::transport::{self, AppState};

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_hub() -> (SocketAddr, RoomRegistryActorHandle) {
    let (registry, _task) = RoomRegistryActorHandle::spawn(
        "hub-test".to_string(),
        RoomSettings {
            max_chat_history: 1000,
            notify_denied_actions: false,
        },
        HubMetrics::new(),
    );
    let app = transport::router(AppState {
        registry: registry.clone(),
        outbound_queue_size: 64,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr, room_key: &str, email: &str) -> WsClient {
    let url = format!("ws://{addr}/ws/{room_key}?email={email}");
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket connect should succeed");
    ws
}

async fn send(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("send should succeed");
}

/// Next text frame as JSON; panics after a second of silence.
async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(1), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("frame error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame should be JSON");
        }
    }
}

async fn next_of_type(ws: &mut WsClient, event_type: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == event_type {
            return value;
        }
    }
}

/// True once the stream has closed (ignoring any remaining frames).
async fn closed(ws: &mut WsClient) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(1), ws.next()).await {
            Ok(None) => return true,
            Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return true,
            Err(_) => return false,
        }
    }
}

fn participants(value: &Value) -> Vec<String> {
    let mut list: Vec<String> = value["participants"]
        .as_array()
        .expect("participants array")
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect();
    list.sort();
    list
}

#[tokio::test]
async fn test_join_updates_every_roster() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "standup", "alice@x.com").await;
    let roster = next_of_type(&mut alice, "participant-list").await;
    assert_eq!(participants(&roster), vec!["alice@x.com"]);

    let mut bob = connect(addr, "standup", "bob@x.com").await;
    let roster = next_of_type(&mut bob, "participant-list").await;
    assert_eq!(participants(&roster), vec!["alice@x.com", "bob@x.com"]);
    let roster = next_of_type(&mut alice, "participant-list").await;
    assert_eq!(participants(&roster), vec!["alice@x.com", "bob@x.com"]);
}

#[tokio::test]
async fn test_chat_broadcast_and_history_replay() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "retro", "alice@x.com").await;
    send(&mut alice, r#"{"type":"chat","message":"went well"}"#).await;

    // The sender hears its own chat.
    let chat = next_of_type(&mut alice, "chat").await;
    assert_eq!(chat["sender"], "alice@x.com");
    assert_eq!(chat["message"], "went well");

    // A late joiner gets the history replayed.
    let mut bob = connect(addr, "retro", "bob@x.com").await;
    let history = next_of_type(&mut bob, "chat-history").await;
    assert_eq!(history["messages"][0]["message"], "went well");
    assert_eq!(history["messages"][0]["sender"], "alice@x.com");
}

#[tokio::test]
async fn test_signaling_relay_skips_sender() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "call", "alice@x.com").await;
    let mut bob = connect(addr, "call", "bob@x.com").await;
    next_of_type(&mut bob, "participant-list").await;

    let offer = r#"{"type":"offer","sdp":"v=0 fake sdp","from":"alice@x.com"}"#;
    send(&mut alice, offer).await;

    let relayed = next_of_type(&mut bob, "offer").await;
    assert_eq!(relayed["sdp"], "v=0 fake sdp");

    // Alice never hears her own offer: her next frame is the chat below.
    send(&mut alice, r#"{"type":"chat","message":"calling"}"#).await;
    loop {
        let value = next_json(&mut alice).await;
        assert_ne!(value["type"], "offer");
        if value["type"] == "chat" {
            break;
        }
    }
}

#[tokio::test]
async fn test_join_request_auto_approved_without_host() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "open-room", "alice@x.com").await;
    send(&mut alice, r#"{"type":"join_request"}"#).await;

    let approval = next_of_type(&mut alice, "approval").await;
    assert_eq!(approval["email"], "alice@x.com");
    assert_eq!(approval["status"], "approved");
    assert_eq!(approval["roomId"], "open-room");
}

#[tokio::test]
async fn test_host_gated_admission_accept() {
    let (addr, registry) = start_hub().await;
    registry
        .set_host("gated".to_string(), "host@x.com".to_string())
        .await
        .unwrap();

    let mut host = connect(addr, "gated", "host@x.com").await;
    let mut user = connect(addr, "gated", "user@x.com").await;

    send(&mut user, r#"{"type":"join_request"}"#).await;
    let notification = next_of_type(&mut host, "join_request_notification").await;
    assert_eq!(notification["requester"], "user@x.com");

    send(
        &mut host,
        r#"{"type":"accept_join_request","requesterEmail":"user@x.com"}"#,
    )
    .await;
    let approval = next_of_type(&mut user, "approval").await;
    assert_eq!(approval["email"], "user@x.com");
    assert_eq!(approval["status"], "approved");
}

#[tokio::test]
async fn test_host_gated_admission_reject_closes_socket() {
    let (addr, registry) = start_hub().await;
    registry
        .set_host("gated".to_string(), "host@x.com".to_string())
        .await
        .unwrap();

    let mut host = connect(addr, "gated", "host@x.com").await;
    let mut user = connect(addr, "gated", "user@x.com").await;

    send(&mut user, r#"{"type":"join_request"}"#).await;
    next_of_type(&mut host, "join_request_notification").await;

    send(
        &mut host,
        r#"{"type":"reject_join_request","requesterEmail":"user@x.com","reason":"room full"}"#,
    )
    .await;

    let rejection = next_of_type(&mut user, "join_rejected").await;
    assert_eq!(rejection["reason"], "room full");
    assert_eq!(rejection["rejectedBy"], "host@x.com");
    assert!(closed(&mut user).await);
}

#[tokio::test]
async fn test_host_kick_flow() {
    let (addr, registry) = start_hub().await;
    registry
        .set_host("r1".to_string(), "h@x.com".to_string())
        .await
        .unwrap();

    let mut host = connect(addr, "r1", "h@x.com").await;
    let mut user = connect(addr, "r1", "u@x.com").await;
    next_of_type(&mut user, "participant-list").await;
    // Drain the host's two join-time rosters so the post-kick roster is
    // unambiguous.
    next_of_type(&mut host, "participant-list").await;
    next_of_type(&mut host, "participant-list").await;

    send(
        &mut host,
        r#"{"type":"kick_participant","participantEmail":"u@x.com","reason":"disruptive"}"#,
    )
    .await;

    // Target is told why, then disconnected.
    let kicked = next_of_type(&mut user, "kicked").await;
    assert_eq!(kicked["reason"], "disruptive");
    assert_eq!(kicked["kickedBy"], "h@x.com");
    assert!(closed(&mut user).await);

    // Survivors see the shrunken roster and the removal notice.
    let roster = next_of_type(&mut host, "participant-list").await;
    assert_eq!(participants(&roster), vec!["h@x.com"]);
    let notice = next_of_type(&mut host, "participant_kicked").await;
    assert_eq!(notice["participantEmail"], "u@x.com");
    assert_eq!(notice["kickedBy"], "h@x.com");
}

#[tokio::test]
async fn test_non_host_kick_is_ignored() {
    let (addr, registry) = start_hub().await;
    registry
        .set_host("r1".to_string(), "h@x.com".to_string())
        .await
        .unwrap();

    let mut host = connect(addr, "r1", "h@x.com").await;
    let mut user = connect(addr, "r1", "u@x.com").await;
    next_of_type(&mut host, "participant-list").await;

    send(
        &mut user,
        r#"{"type":"kick_participant","participantEmail":"h@x.com","reason":"coup"}"#,
    )
    .await;

    // The host stays connected and can still act.
    send(&mut host, r#"{"type":"chat","message":"still here"}"#).await;
    let chat = next_of_type(&mut host, "chat").await;
    assert_eq!(chat["message"], "still here");
    let chat = next_of_type(&mut user, "chat").await;
    assert_eq!(chat["message"], "still here");
}

#[tokio::test]
async fn test_upgrade_rejected_without_identity() {
    let (addr, _registry) = start_hub().await;

    let url = format!("ws://{addr}/ws/standup");
    let error = tokio_tungstenite::connect_async(url)
        .await
        .expect_err("upgrade should be rejected");
    match error {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_room_purges_and_rejoin_is_fresh() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "ephemeral", "alice@x.com").await;
    send(&mut alice, r#"{"type":"chat","message":"secret"}"#).await;
    next_of_type(&mut alice, "chat").await;
    alice.close(None).await.unwrap();

    // Give the hub a moment to purge the emptied room.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut bob = connect(addr, "ephemeral", "bob@x.com").await;
    let roster = next_of_type(&mut bob, "participant-list").await;
    assert_eq!(participants(&roster), vec!["bob@x.com"]);
    // No history replay: the previous room's chat is gone.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), bob.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_failed_join_sends_typed_error_frame() {
    let (addr, registry) = start_hub().await;
    registry.shutdown().await;

    // The upgrade still completes; the hub then refuses admission with a
    // JSON error event before closing, never a bare text frame.
    let mut late = connect(addr, "standup", "late@x.com").await;
    let event = next_json(&mut late).await;
    assert_eq!(event["type"], "error");
    assert!(event["message"].is_string());
    assert!(closed(&mut late).await);
}

#[tokio::test]
async fn test_unknown_frame_type_broadcast_verbatim() {
    let (addr, _registry) = start_hub().await;

    let mut alice = connect(addr, "r1", "alice@x.com").await;
    let mut bob = connect(addr, "r1", "bob@x.com").await;
    next_of_type(&mut bob, "participant-list").await;

    send(
        &mut alice,
        r#"{"type":"raise_hand","participant":"alice@x.com"}"#,
    )
    .await;

    let event = next_of_type(&mut bob, "raise_hand").await;
    assert_eq!(event["participant"], "alice@x.com");
    let event = next_of_type(&mut alice, "raise_hand").await;
    assert_eq!(event["participant"], "alice@x.com");
}
