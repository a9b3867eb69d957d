//! Message types for communication between actors.
//!
//! Request/response pairs use oneshot channels; fire-and-forget
//! notifications are plain sends. All messages flow down the actor
//! hierarchy (registry -> room -> connection) except responses.

use crate::actors::room::RoomActorHandle;
use crate::errors::HubError;
use crate::protocol::{InboundFrame, Outbound};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

/// Messages handled by the room registry actor.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Admit a connection into a room, spawning the room actor if needed.
    Join {
        room_key: String,
        identity: String,
        /// Sink for serialized frames destined for this connection's socket.
        outbound: mpsc::Sender<String>,
        respond_to: oneshot::Sender<Result<JoinTicket, HubError>>,
    },

    /// Record the host for a room. The first write wins; later writes for
    /// the same room are ignored.
    SetHost {
        room_key: String,
        host: String,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Snapshot the presence roster of a room.
    RoomParticipants {
        room_key: String,
        respond_to: oneshot::Sender<Result<Vec<String>, HubError>>,
    },

    /// Report hub-wide status.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Begin draining: reject new joins and shut down all rooms.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages handled by a room actor.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection has been admitted; register it and announce presence.
    ConnectionJoin {
        connection_id: String,
        identity: String,
        outbound: mpsc::Sender<String>,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// The socket read side ended; unregister the connection.
    ConnectionClosed { connection_id: String },

    /// A parsed inbound frame from one of the room's connections.
    Frame {
        connection_id: String,
        frame: InboundFrame,
    },

    /// Registry-forwarded host assignment.
    SetHost { host: String },

    /// Snapshot room state (presence, host, pending requests).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages handled by a connection actor.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver a payload to the client.
    Deliver { payload: Outbound },

    /// Close the connection (after any already-queued deliveries).
    Close { reason: CloseReason },
}

/// Why a connection is being closed by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Removed by the host.
    Kicked,
    /// Join request rejected by the host.
    Rejected,
    /// Hub is shutting down.
    Shutdown,
}

/// Successful join: the connection's ID and a handle to its room.
#[derive(Debug, Clone)]
pub struct JoinTicket {
    pub connection_id: String,
    pub room: RoomActorHandle,
}

/// A pending admission request awaiting a host decision.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub requester: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time snapshot of a room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_key: String,
    pub participants: Vec<String>,
    pub host: Option<String>,
    pub pending_requests: Vec<String>,
    pub chat_len: usize,
    pub connection_count: usize,
}

/// Point-in-time snapshot of the registry.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    pub hub_id: String,
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
}

/// Per-room behavior knobs, plumbed from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    /// Retained chat entries; oldest evicted past this cap.
    pub max_chat_history: usize,
    /// Send `action_denied` to non-hosts instead of silently dropping.
    pub notify_denied_actions: bool,
}

impl RoomSettings {
    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_chat_history: config.max_chat_history,
            notify_denied_actions: config.notify_denied_actions,
        }
    }
}
