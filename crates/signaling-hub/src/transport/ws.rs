//! WebSocket endpoint: upgrade, identity validation, socket pumping.
//!
//! Each accepted socket becomes one connection in one room. The read half
//! parses frames and forwards them to the room actor; the write half
//! drains the connection's outbound queue. The socket closes when the
//! connection actor exits (kick, rejection, shutdown) or when the client
//! goes away.

use crate::protocol::{InboundFrame, ServerEvent};
use crate::transport::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upper bound on identity length; RFC 5321 caps address length below this.
const MAX_IDENTITY_LEN: usize = 320;

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub email: Option<String>,
}

/// `GET /ws/{room_key}?email=...` - upgrade into a room connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_key): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let identity = match validate_identity(params.email.as_deref()) {
        Ok(identity) => identity,
        Err(reason) => {
            debug!(
                target: "hub.transport.ws",
                room_key = %room_key,
                reason = %reason,
                "Rejecting upgrade with invalid identity"
            );
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    ws.on_upgrade(move |socket| drive_connection(socket, state, room_key, identity))
}

/// Check the `email` query parameter before admitting a connection.
///
/// # Errors
///
/// Returns a client-facing reason when the identity is absent, blank,
/// overlong, or contains whitespace or control characters.
pub fn validate_identity(email: Option<&str>) -> Result<String, &'static str> {
    let Some(raw) = email else {
        return Err("Missing required query parameter: email");
    };
    let identity = raw.trim();
    if identity.is_empty() {
        return Err("Identity must not be empty");
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err("Identity too long");
    }
    if identity
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err("Identity must not contain whitespace or control characters");
    }
    Ok(identity.to_string())
}

/// Pump a socket for the lifetime of its room connection.
async fn drive_connection(
    mut socket: WebSocket,
    state: AppState,
    room_key: String,
    identity: String,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(state.outbound_queue_size);

    let ticket = match state
        .registry
        .join(room_key.clone(), identity.clone(), outbound_tx)
        .await
    {
        Ok(ticket) => ticket,
        Err(e) => {
            warn!(
                target: "hub.transport.ws",
                room_key = %room_key,
                identity = %identity,
                error = %e,
                "Join failed, closing socket"
            );
            let event = ServerEvent::Error {
                message: e.client_message(),
            };
            if let Ok(payload) = serde_json::to_string(&event) {
                let _ = socket.send(Message::Text(payload)).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        target: "hub.transport.ws",
        room_key = %room_key,
        identity = %identity,
        connection_id = %ticket.connection_id,
        "WebSocket connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write half: drain the outbound queue until the connection actor
    // drops its sender, then close the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Read half: parse and forward until the client goes away or the hub
    // closes the connection (kick, rejection, shutdown). The write task
    // finishing is the hub-side signal; without it a client that ignores
    // the close handshake could keep injecting frames.
    let hub_closed = loop {
        tokio::select! {
            _ = &mut write_task => break true,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match InboundFrame::parse(&text) {
                        Ok(frame) => {
                            ticket
                                .room
                                .frame(ticket.connection_id.clone(), frame)
                                .await;
                        }
                        Err(e) => {
                            // One bad frame never terminates the session.
                            debug!(
                                target: "hub.transport.ws",
                                connection_id = %ticket.connection_id,
                                error = %e,
                                "Dropping malformed frame"
                            );
                        }
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break false,
                    Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {}
                }
            }
        }
    };

    ticket
        .room
        .connection_closed(ticket.connection_id.clone())
        .await;
    if !hub_closed {
        let _ = write_task.await;
    }

    info!(
        target: "hub.transport.ws",
        room_key = %room_key,
        identity = %identity,
        connection_id = %ticket.connection_id,
        "WebSocket connection closed"
    );
}
