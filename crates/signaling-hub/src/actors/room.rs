//! Room actor: owns all state for a single meeting room.
//!
//! A room actor is the sole owner of its presence roster, host binding,
//! chat history, pending join requests, and the connection actors of every
//! session in the room. Rooms never touch each other's state; all access
//! goes through the actor's mailbox, so there is no shared-state locking.
//!
//! The actor exits when its last connection leaves, discarding every piece
//! of room state. A later join to the same key gets a brand new room.

use crate::actors::connection::ConnectionActorHandle;
use crate::actors::messages::{
    CloseReason, JoinRequest, RoomMessage, RoomSettings, RoomState,
};
use crate::actors::metrics::HubMetrics;
use crate::errors::HubError;
use crate::protocol::{
    ChatEntry, InboundFrame, Outbound, ServerEvent, APPROVAL_STATUS_APPROVED,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mailbox depth for a room actor.
const MAILBOX_SIZE: usize = 256;

/// Interval between sweeps for connection actors that died without a
/// disconnect notification.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a connection actor task after closing it.
const CONNECTION_REAP_TIMEOUT: Duration = Duration::from_millis(100);

/// Handle for communicating with a room actor.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    room_key: String,
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
}

impl RoomActorHandle {
    /// Spawn a room actor.
    ///
    /// `host` is the pre-registered host identity, if a collaborator
    /// service bound one before the first join.
    pub fn spawn(
        room_key: String,
        host: Option<String>,
        settings: RoomSettings,
        metrics: Arc<HubMetrics>,
        parent_cancel: &CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let cancel_token = parent_cancel.child_token();

        let actor = RoomActor {
            room_key: room_key.clone(),
            settings,
            metrics,
            receiver,
            connections: HashMap::new(),
            presence: HashSet::new(),
            host,
            chat_log: VecDeque::new(),
            pending_requests: Vec::new(),
            saw_connection: false,
            cancel_token: cancel_token.clone(),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                room_key,
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Register an admitted connection with the room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomClosed`] when the room actor has exited
    /// (purged after its last connection left); the registry retries
    /// against a fresh room.
    pub async fn join(
        &self,
        connection_id: String,
        identity: String,
        outbound: mpsc::Sender<String>,
    ) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RoomMessage::ConnectionJoin {
                connection_id,
                identity,
                outbound,
                respond_to,
            })
            .await
            .map_err(|_| HubError::RoomClosed(self.room_key.clone()))?;
        response
            .await
            .map_err(|_| HubError::RoomClosed(self.room_key.clone()))?
    }

    /// Forward a parsed inbound frame to the room.
    pub async fn frame(&self, connection_id: String, frame: InboundFrame) {
        // A closed mailbox means the room is gone; the transport will see
        // the socket close shortly, so the frame is silently dropped.
        let _ = self
            .sender
            .send(RoomMessage::Frame {
                connection_id,
                frame,
            })
            .await;
    }

    /// Notify the room that a connection's socket has ended.
    pub async fn connection_closed(&self, connection_id: String) {
        let _ = self
            .sender
            .send(RoomMessage::ConnectionClosed { connection_id })
            .await;
    }

    /// Bind the room host.
    pub async fn set_host(&self, host: String) {
        let _ = self.sender.send(RoomMessage::SetHost { host }).await;
    }

    /// Snapshot the room's state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomClosed`] when the room actor has exited.
    pub async fn get_state(&self) -> Result<RoomState, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to })
            .await
            .map_err(|_| HubError::RoomClosed(self.room_key.clone()))?;
        response
            .await
            .map_err(|_| HubError::RoomClosed(self.room_key.clone()))
    }

    /// Whether the room actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Cancel the room actor and everything under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// A connection registered with this room.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
    identity: String,
}

/// Room actor state.
struct RoomActor {
    room_key: String,
    settings: RoomSettings,
    metrics: Arc<HubMetrics>,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Live connections by connection ID. Two connections may share an
    /// identity; presence tracks identities, this map tracks sockets.
    connections: HashMap<String, ManagedConnection>,
    presence: HashSet<String>,
    host: Option<String>,
    chat_log: VecDeque<ChatEntry>,
    pending_requests: Vec<JoinRequest>,
    /// Set on the first join; gates the empty-room purge.
    saw_connection: bool,
    cancel_token: CancellationToken,
}

impl RoomActor {
    async fn run(mut self) {
        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            host = ?self.host,
            "Room actor started"
        );

        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; skip it.
        health_interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.room",
                        room_key = %self.room_key,
                        "Room actor cancelled, shutting down"
                    );
                    self.graceful_shutdown().await;
                    break;
                }
                _ = health_interval.tick() => {
                    self.check_connection_health().await;
                    if self.should_purge() {
                        break;
                    }
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(msg) => {
                            self.handle_message(msg).await;
                            if self.should_purge() {
                                break;
                            }
                        }
                        None => {
                            // Registry dropped the handle; close out cleanly.
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            chat_entries = self.chat_log.len(),
            "Room purged"
        );
    }

    /// A room that has seen at least one connection and is now empty is
    /// purged. A freshly spawned room survives until its first join
    /// registers, so spawn and join cannot race the purge.
    fn should_purge(&self) -> bool {
        self.saw_connection && self.connections.is_empty()
    }

    async fn handle_message(&mut self, msg: RoomMessage) {
        match msg {
            RoomMessage::ConnectionJoin {
                connection_id,
                identity,
                outbound,
                respond_to,
            } => {
                let result = self.handle_connection_join(connection_id, identity, outbound);
                let _ = respond_to.send(result);
            }
            RoomMessage::ConnectionClosed { connection_id } => {
                self.handle_connection_closed(&connection_id).await;
            }
            RoomMessage::Frame {
                connection_id,
                frame,
            } => {
                self.handle_frame(&connection_id, frame).await;
            }
            RoomMessage::SetHost { host } => {
                if self.host.is_none() {
                    info!(
                        target: "hub.actor.room",
                        room_key = %self.room_key,
                        host = %host,
                        "Host bound to room"
                    );
                    self.host = Some(host);
                }
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_key: self.room_key.clone(),
                    participants: self.presence.iter().cloned().collect(),
                    host: self.host.clone(),
                    pending_requests: self
                        .pending_requests
                        .iter()
                        .map(|r| r.requester.clone())
                        .collect(),
                    chat_len: self.chat_log.len(),
                    connection_count: self.connections.len(),
                });
            }
        }
    }

    fn handle_connection_join(
        &mut self,
        connection_id: String,
        identity: String,
        outbound: mpsc::Sender<String>,
    ) -> Result<(), HubError> {
        let (handle, task_handle) = ConnectionActorHandle::spawn(
            connection_id.clone(),
            identity.clone(),
            self.room_key.clone(),
            outbound,
            Arc::clone(&self.metrics),
            &self.cancel_token,
        );

        self.connections.insert(
            connection_id.clone(),
            ManagedConnection {
                handle,
                task_handle,
                identity: identity.clone(),
            },
        );
        self.saw_connection = true;
        self.metrics.connection_created();
        self.presence.insert(identity.clone());

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            connection_id = %connection_id,
            identity = %identity,
            participants = self.presence.len(),
            "Connection joined room"
        );

        self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantList {
            participants: self.presence.iter().cloned().collect(),
        }));

        if !self.chat_log.is_empty() {
            self.send_to_connection(
                &connection_id,
                &Outbound::Event(ServerEvent::ChatHistory {
                    messages: self.chat_log.iter().cloned().collect(),
                }),
            );
        }

        Ok(())
    }

    async fn handle_connection_closed(&mut self, connection_id: &str) {
        let Some(conn) = self.connections.remove(connection_id) else {
            // Already reaped (kick and socket close can race).
            return;
        };
        self.metrics.connection_closed();

        let identity = conn.identity;
        conn.handle.cancel();
        drop(conn.handle);
        if tokio::time::timeout(CONNECTION_REAP_TIMEOUT, conn.task_handle)
            .await
            .is_err()
        {
            warn!(
                target: "hub.actor.room",
                room_key = %self.room_key,
                connection_id = %connection_id,
                "Connection actor did not stop in time"
            );
        }

        self.presence.remove(&identity);
        self.pending_requests.retain(|r| r.requester != identity);

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            connection_id = %connection_id,
            identity = %identity,
            participants = self.presence.len(),
            "Connection left room"
        );

        if !self.connections.is_empty() {
            self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantList {
                participants: self.presence.iter().cloned().collect(),
            }));
        }
    }

    async fn handle_frame(&mut self, connection_id: &str, frame: InboundFrame) {
        let Some(identity) = self
            .connections
            .get(connection_id)
            .map(|c| c.identity.clone())
        else {
            debug!(
                target: "hub.actor.room",
                room_key = %self.room_key,
                connection_id = %connection_id,
                "Frame from unknown connection, dropping"
            );
            return;
        };

        match frame {
            InboundFrame::Chat { message } => {
                self.metrics.record_frame("chat");
                self.handle_chat(identity, message);
            }
            InboundFrame::JoinRequest => {
                self.metrics.record_frame("join_request");
                self.handle_join_request(identity);
            }
            InboundFrame::Approval { raw } => {
                self.metrics.record_frame("approval");
                self.broadcast_all(&Outbound::Raw(raw));
            }
            InboundFrame::AcceptJoinRequest { requester_email } => {
                self.metrics.record_frame("accept_join_request");
                if self.require_host(connection_id, &identity, "accept_join_request") {
                    self.pending_requests
                        .retain(|r| r.requester != requester_email);
                    self.approve_participant(&requester_email);
                }
            }
            InboundFrame::RejectJoinRequest {
                requester_email,
                reason,
            } => {
                self.metrics.record_frame("reject_join_request");
                if self.require_host(connection_id, &identity, "reject_join_request") {
                    self.reject_participant(&requester_email, &identity, reason)
                        .await;
                }
            }
            InboundFrame::KickParticipant {
                participant_email,
                reason,
            } => {
                self.metrics.record_frame("kick_participant");
                if self.require_host(connection_id, &identity, "kick_participant") {
                    self.kick_participant(&participant_email, &identity, reason)
                        .await;
                }
            }
            InboundFrame::Signal { kind, raw } => {
                self.metrics.record_frame(kind.as_str());
                self.broadcast_others(connection_id, &Outbound::Raw(raw));
            }
            InboundFrame::Other { frame_type, raw } => {
                self.metrics.record_frame("other");
                debug!(
                    target: "hub.actor.room",
                    room_key = %self.room_key,
                    frame_type = %frame_type,
                    "Broadcasting unrecognized frame type"
                );
                self.broadcast_all(&Outbound::Raw(raw));
            }
        }
    }

    fn handle_chat(&mut self, sender: String, message: String) {
        let entry = ChatEntry {
            sender,
            message,
            timestamp: Utc::now(),
        };

        self.chat_log.push_back(entry.clone());
        while self.chat_log.len() > self.settings.max_chat_history {
            self.chat_log.pop_front();
        }

        self.broadcast_all(&Outbound::Event(ServerEvent::Chat {
            message: entry.message,
            sender: entry.sender,
            timestamp: entry.timestamp,
        }));
    }

    fn handle_join_request(&mut self, requester: String) {
        let Some(host) = self.host.clone() else {
            // No host to gate admission: approve immediately.
            info!(
                target: "hub.actor.room",
                room_key = %self.room_key,
                requester = %requester,
                "No host registered, auto-approving join request"
            );
            self.approve_participant(&requester);
            return;
        };

        let timestamp = Utc::now();
        if !self
            .pending_requests
            .iter()
            .any(|r| r.requester == requester)
        {
            self.pending_requests.push(JoinRequest {
                requester: requester.clone(),
                timestamp,
            });
        }

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            requester = %requester,
            pending = self.pending_requests.len(),
            "Join request queued for host decision"
        );

        self.send_to_identity(
            &host,
            &Outbound::Event(ServerEvent::JoinRequestNotification {
                requester,
                timestamp,
            }),
        );
    }

    /// Admit a participant: presence, approval broadcast, fresh roster.
    fn approve_participant(&mut self, identity: &str) {
        self.presence.insert(identity.to_string());

        self.broadcast_all(&Outbound::Event(ServerEvent::Approval {
            email: identity.to_string(),
            status: APPROVAL_STATUS_APPROVED.to_string(),
            room_id: self.room_key.clone(),
        }));
        self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantList {
            participants: self.presence.iter().cloned().collect(),
        }));
    }

    async fn reject_participant(&mut self, requester: &str, rejected_by: &str, reason: String) {
        self.pending_requests.retain(|r| r.requester != requester);

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            requester = %requester,
            rejected_by = %rejected_by,
            "Join request rejected"
        );

        self.send_to_identity(
            requester,
            &Outbound::Event(ServerEvent::JoinRejected {
                reason,
                rejected_by: rejected_by.to_string(),
            }),
        );
        self.close_and_reap_identity(requester, CloseReason::Rejected)
            .await;

        if !self.connections.is_empty() {
            self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantList {
                participants: self.presence.iter().cloned().collect(),
            }));
        }
    }

    async fn kick_participant(&mut self, target: &str, kicked_by: &str, reason: String) {
        self.presence.remove(target);

        info!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            participant = %target,
            kicked_by = %kicked_by,
            "Participant kicked"
        );

        self.send_to_identity(
            target,
            &Outbound::Event(ServerEvent::Kicked {
                reason: reason.clone(),
                kicked_by: kicked_by.to_string(),
            }),
        );
        self.close_and_reap_identity(target, CloseReason::Kicked)
            .await;

        self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantList {
            participants: self.presence.iter().cloned().collect(),
        }));
        self.broadcast_all(&Outbound::Event(ServerEvent::ParticipantKicked {
            participant_email: target.to_string(),
            kicked_by: kicked_by.to_string(),
            reason,
        }));
    }

    /// Close every connection bound to `identity` and remove it from the
    /// room immediately, so no further frames from those connections are
    /// dispatched. Queued targeted events flush before the close lands.
    async fn close_and_reap_identity(&mut self, identity: &str, reason: CloseReason) {
        let targets: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.identity == identity)
            .map(|(id, _)| id.clone())
            .collect();

        for connection_id in targets {
            let Some(conn) = self.connections.remove(&connection_id) else {
                continue;
            };
            self.metrics.connection_closed();
            conn.handle.close(reason);
            drop(conn.handle);
            if tokio::time::timeout(CONNECTION_REAP_TIMEOUT, conn.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "hub.actor.room",
                    room_key = %self.room_key,
                    connection_id = %connection_id,
                    "Connection actor did not stop in time"
                );
            }
        }

        self.presence.remove(identity);
        self.pending_requests.retain(|r| r.requester != identity);
    }

    /// Gate a host-only action. Non-host attempts are dropped silently
    /// unless denial notifications are enabled.
    fn require_host(&self, connection_id: &str, identity: &str, action: &str) -> bool {
        if self.host.as_deref() == Some(identity) {
            return true;
        }

        warn!(
            target: "hub.actor.room",
            room_key = %self.room_key,
            identity = %identity,
            action = %action,
            "Non-host attempted host-gated action"
        );

        if self.settings.notify_denied_actions {
            self.send_to_connection(
                connection_id,
                &Outbound::Event(ServerEvent::ActionDenied {
                    action: action.to_string(),
                }),
            );
        }
        false
    }

    /// Reap connection actors that stopped without a disconnect message.
    async fn check_connection_health(&mut self) {
        let finished: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for connection_id in finished {
            warn!(
                target: "hub.actor.room",
                room_key = %self.room_key,
                connection_id = %connection_id,
                "Reaping finished connection actor"
            );
            self.handle_connection_closed(&connection_id).await;
        }
    }

    async fn graceful_shutdown(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.handle.close(CloseReason::Shutdown);
            drop(conn.handle);
            if tokio::time::timeout(CONNECTION_REAP_TIMEOUT, conn.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "hub.actor.room",
                    room_key = %self.room_key,
                    "Connection actor did not stop during shutdown"
                );
            }
            self.metrics.connection_closed();
        }
        self.presence.clear();
        self.pending_requests.clear();
    }

    fn broadcast_all(&self, payload: &Outbound) {
        for conn in self.connections.values() {
            if !conn.handle.deliver(payload.clone()) {
                self.metrics.record_delivery_failure();
            }
        }
    }

    fn broadcast_others(&self, except_connection_id: &str, payload: &Outbound) {
        for (id, conn) in &self.connections {
            if id == except_connection_id {
                continue;
            }
            if !conn.handle.deliver(payload.clone()) {
                self.metrics.record_delivery_failure();
            }
        }
    }

    /// Deliver to every connection bound to `identity`; silent no-op when
    /// none is connected.
    fn send_to_identity(&self, identity: &str, payload: &Outbound) {
        for conn in self.connections.values() {
            if conn.identity == identity && !conn.handle.deliver(payload.clone()) {
                self.metrics.record_delivery_failure();
            }
        }
    }

    fn send_to_connection(&self, connection_id: &str, payload: &Outbound) {
        if let Some(conn) = self.connections.get(connection_id) {
            if !conn.handle.deliver(payload.clone()) {
                self.metrics.record_delivery_failure();
            }
        }
    }

}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn settings() -> RoomSettings {
        RoomSettings {
            max_chat_history: 1000,
            notify_denied_actions: false,
        }
    }

    fn spawn_room(
        host: Option<&str>,
        settings: RoomSettings,
    ) -> (RoomActorHandle, JoinHandle<()>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (handle, task) = RoomActorHandle::spawn(
            "r1".to_string(),
            host.map(ToString::to_string),
            settings,
            HubMetrics::new(),
            &cancel,
        );
        (handle, task, cancel)
    }

    async fn join(
        room: &RoomActorHandle,
        connection_id: &str,
        identity: &str,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        room.join(connection_id.to_string(), identity.to_string(), tx)
            .await
            .expect("join should succeed");
        rx
    }

    async fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        serde_json::from_str(&text).expect("event should be JSON")
    }

    /// Receive events until one of the given type arrives.
    async fn next_of_type(rx: &mut mpsc::Receiver<String>, event_type: &str) -> Value {
        loop {
            let value = next_json(rx).await;
            if value["type"] == event_type {
                return value;
            }
        }
    }

    /// Discard everything already queued for this connection.
    async fn settle(rx: &mut mpsc::Receiver<String>) {
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {}
    }

    fn participants(value: &Value) -> Vec<String> {
        let mut list: Vec<String> = value["participants"]
            .as_array()
            .expect("participants should be an array")
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect();
        list.sort();
        list
    }

    #[tokio::test]
    async fn test_join_broadcasts_roster_and_replays_history() {
        let (room, _task, _cancel) = spawn_room(None, settings());

        let mut alice = join(&room, "c1", "alice@x.com").await;
        let roster = next_of_type(&mut alice, "participant-list").await;
        assert_eq!(participants(&roster), vec!["alice@x.com"]);

        room.frame(
            "c1".to_string(),
            InboundFrame::Chat {
                message: "hello".to_string(),
            },
        )
        .await;
        let chat = next_of_type(&mut alice, "chat").await;
        assert_eq!(chat["sender"], "alice@x.com");
        assert_eq!(chat["message"], "hello");

        let mut bob = join(&room, "c2", "bob@x.com").await;
        let roster = next_of_type(&mut alice, "participant-list").await;
        assert_eq!(participants(&roster), vec!["alice@x.com", "bob@x.com"]);

        // Newcomer gets the roster, then the retained history.
        let roster = next_of_type(&mut bob, "participant-list").await;
        assert_eq!(participants(&roster), vec!["alice@x.com", "bob@x.com"]);
        let history = next_of_type(&mut bob, "chat-history").await;
        assert_eq!(history["messages"][0]["message"], "hello");
    }

    #[tokio::test]
    async fn test_no_history_replay_for_empty_log() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let _alice = join(&room, "c1", "alice@x.com").await;

        let mut bob = join(&room, "c2", "bob@x.com").await;
        let first = next_json(&mut bob).await;
        assert_eq!(first["type"], "participant-list");
        // Nothing else queued: no chat-history event for an empty log.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), bob.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_chat_history_evicts_oldest_past_cap() {
        let (room, _task, _cancel) = spawn_room(
            None,
            RoomSettings {
                max_chat_history: 2,
                notify_denied_actions: false,
            },
        );
        let mut alice = join(&room, "c1", "alice@x.com").await;

        for msg in ["one", "two", "three"] {
            room.frame(
                "c1".to_string(),
                InboundFrame::Chat {
                    message: msg.to_string(),
                },
            )
            .await;
            next_of_type(&mut alice, "chat").await;
        }

        let mut bob = join(&room, "c2", "bob@x.com").await;
        let history = next_of_type(&mut bob, "chat-history").await;
        let messages = history["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["message"], "two");
        assert_eq!(messages[1]["message"], "three");
    }

    #[tokio::test]
    async fn test_signaling_relayed_to_others_never_echoed() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let mut alice = join(&room, "c1", "alice@x.com").await;
        let mut bob = join(&room, "c2", "bob@x.com").await;
        settle(&mut alice).await;
        settle(&mut bob).await;

        let offer = r#"{"type":"offer","sdp":"v=0...","from":"alice@x.com"}"#;
        room.frame(
            "c1".to_string(),
            InboundFrame::parse(offer).unwrap(),
        )
        .await;
        // Relay is byte-for-byte verbatim.
        let text = tokio::time::timeout(Duration::from_secs(1), bob.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, offer);

        // The sender sees its own next chat, not the offer.
        room.frame(
            "c1".to_string(),
            InboundFrame::Chat {
                message: "after".to_string(),
            },
        )
        .await;
        let next = next_json(&mut alice).await;
        assert_eq!(next["type"], "chat");
    }

    #[tokio::test]
    async fn test_unknown_frame_type_broadcast_to_all() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let mut alice = join(&room, "c1", "alice@x.com").await;
        let mut bob = join(&room, "c2", "bob@x.com").await;
        settle(&mut alice).await;
        settle(&mut bob).await;

        let raw = r#"{"type":"raise_hand","participant":"alice@x.com"}"#;
        room.frame("c1".to_string(), InboundFrame::parse(raw).unwrap())
            .await;

        assert_eq!(next_of_type(&mut alice, "raise_hand").await["type"], "raise_hand");
        assert_eq!(next_of_type(&mut bob, "raise_hand").await["type"], "raise_hand");
    }

    #[tokio::test]
    async fn test_join_request_auto_approved_without_host() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let mut alice = join(&room, "c1", "alice@x.com").await;

        room.frame("c1".to_string(), InboundFrame::JoinRequest).await;

        let approval = next_of_type(&mut alice, "approval").await;
        assert_eq!(approval["email"], "alice@x.com");
        assert_eq!(approval["status"], "approved");
        assert_eq!(approval["roomId"], "r1");
        next_of_type(&mut alice, "participant-list").await;

        let state = room.get_state().await.unwrap();
        assert!(state.pending_requests.is_empty());
    }

    #[tokio::test]
    async fn test_join_request_queued_and_host_notified() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let _user = join(&room, "c2", "user@x.com").await;

        room.frame("c2".to_string(), InboundFrame::JoinRequest).await;

        let notification = next_of_type(&mut host, "join_request_notification").await;
        assert_eq!(notification["requester"], "user@x.com");

        let state = room.get_state().await.unwrap();
        assert_eq!(state.pending_requests, vec!["user@x.com"]);

        // A repeated request does not duplicate the queue entry.
        room.frame("c2".to_string(), InboundFrame::JoinRequest).await;
        next_of_type(&mut host, "join_request_notification").await;
        let state = room.get_state().await.unwrap();
        assert_eq!(state.pending_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_host_accepts_pending_request() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let mut user = join(&room, "c2", "user@x.com").await;

        room.frame("c2".to_string(), InboundFrame::JoinRequest).await;
        next_of_type(&mut host, "join_request_notification").await;

        room.frame(
            "c1".to_string(),
            InboundFrame::AcceptJoinRequest {
                requester_email: "user@x.com".to_string(),
            },
        )
        .await;

        let approval = next_of_type(&mut user, "approval").await;
        assert_eq!(approval["email"], "user@x.com");
        assert_eq!(next_of_type(&mut host, "approval").await["email"], "user@x.com");

        let state = room.get_state().await.unwrap();
        assert!(state.pending_requests.is_empty());
    }

    #[tokio::test]
    async fn test_host_rejects_pending_request_and_closes_connection() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let mut user = join(&room, "c2", "user@x.com").await;

        room.frame("c2".to_string(), InboundFrame::JoinRequest).await;
        next_of_type(&mut host, "join_request_notification").await;

        room.frame(
            "c1".to_string(),
            InboundFrame::RejectJoinRequest {
                requester_email: "user@x.com".to_string(),
                reason: "room full".to_string(),
            },
        )
        .await;

        let rejection = next_of_type(&mut user, "join_rejected").await;
        assert_eq!(rejection["reason"], "room full");
        assert_eq!(rejection["rejectedBy"], "host@x.com");

        // The rejected connection's actor exits, ending its channel.
        assert!(
            tokio::time::timeout(Duration::from_secs(1), user.recv())
                .await
                .unwrap()
                .is_none()
        );

        let state = room.get_state().await.unwrap();
        assert!(state.pending_requests.is_empty());
    }

    #[tokio::test]
    async fn test_non_host_actions_silently_dropped() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let mut user = join(&room, "c2", "user@x.com").await;
        settle(&mut host).await;
        settle(&mut user).await;

        room.frame(
            "c2".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "host@x.com".to_string(),
                reason: "coup".to_string(),
            },
        )
        .await;

        // Nobody hears anything: no kick, no denial notice by default.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), host.recv())
                .await
                .is_err()
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(100), user.recv())
                .await
                .is_err()
        );

        let state = room.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_denied_action_notice_when_enabled() {
        let (room, _task, _cancel) = spawn_room(
            Some("host@x.com"),
            RoomSettings {
                max_chat_history: 1000,
                notify_denied_actions: true,
            },
        );
        let _host = join(&room, "c1", "host@x.com").await;
        let mut user = join(&room, "c2", "user@x.com").await;

        room.frame(
            "c2".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "host@x.com".to_string(),
                reason: "coup".to_string(),
            },
        )
        .await;

        let denial = next_of_type(&mut user, "action_denied").await;
        assert_eq!(denial["action"], "kick_participant");
    }

    #[tokio::test]
    async fn test_host_kick_notifies_target_then_closes() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let mut user = join(&room, "c2", "user@x.com").await;
        settle(&mut host).await;
        settle(&mut user).await;

        room.frame(
            "c1".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "user@x.com".to_string(),
                reason: "disruptive".to_string(),
            },
        )
        .await;

        // Target gets the kicked event, then its connection closes.
        let kicked = next_of_type(&mut user, "kicked").await;
        assert_eq!(kicked["reason"], "disruptive");
        assert_eq!(kicked["kickedBy"], "host@x.com");
        assert!(
            tokio::time::timeout(Duration::from_secs(1), user.recv())
                .await
                .unwrap()
                .is_none()
        );

        // Survivors get the updated roster and the removal notice.
        let roster = next_of_type(&mut host, "participant-list").await;
        assert_eq!(participants(&roster), vec!["host@x.com"]);
        let notice = next_of_type(&mut host, "participant_kicked").await;
        assert_eq!(notice["participantEmail"], "user@x.com");
        assert_eq!(notice["kickedBy"], "host@x.com");
    }

    #[tokio::test]
    async fn test_kick_of_absent_identity_still_broadcasts() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        settle(&mut host).await;

        room.frame(
            "c1".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "ghost@x.com".to_string(),
                reason: "boo".to_string(),
            },
        )
        .await;

        // The kick proceeds unconditionally: roster and removal notice go
        // out even though the target was never present.
        let roster = next_of_type(&mut host, "participant-list").await;
        assert_eq!(participants(&roster), vec!["host@x.com"]);
        let notice = next_of_type(&mut host, "participant_kicked").await;
        assert_eq!(notice["participantEmail"], "ghost@x.com");
    }

    #[tokio::test]
    async fn test_kicked_connection_frames_dropped_immediately() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let _user = join(&room, "c2", "user@x.com").await;
        settle(&mut host).await;

        room.frame(
            "c1".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "user@x.com".to_string(),
                reason: "disruptive".to_string(),
            },
        )
        .await;
        next_of_type(&mut host, "participant_kicked").await;

        // A frame arriving from the kicked connection after the kick must
        // not be dispatched: the room already dropped the connection.
        room.frame(
            "c2".to_string(),
            InboundFrame::Chat {
                message: "late".to_string(),
            },
        )
        .await;
        assert!(
            tokio::time::timeout(Duration::from_millis(100), host.recv())
                .await
                .is_err()
        );

        let state = room.get_state().await.unwrap();
        assert_eq!(state.connection_count, 1);
        assert_eq!(state.chat_len, 0);
    }

    #[tokio::test]
    async fn test_duplicate_identity_presence_is_idempotent() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let mut first = join(&room, "c1", "alice@x.com").await;
        let _second = join(&room, "c2", "alice@x.com").await;

        let state = room.get_state().await.unwrap();
        assert_eq!(state.participants, vec!["alice@x.com"]);
        assert_eq!(state.connection_count, 2);

        // The twin join still broadcasts a roster with one identity.
        next_of_type(&mut first, "participant-list").await;
        let roster = next_of_type(&mut first, "participant-list").await;
        assert_eq!(participants(&roster), vec!["alice@x.com"]);

        // One twin leaving takes the identity with it; the surviving
        // connection stays registered.
        room.connection_closed("c2".to_string()).await;
        let state = room.get_state().await.unwrap();
        assert_eq!(state.connection_count, 1);
        assert!(state.participants.is_empty());
    }

    #[tokio::test]
    async fn test_kick_closes_every_connection_of_identity() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let mut tab_one = join(&room, "c2", "user@x.com").await;
        let mut tab_two = join(&room, "c3", "user@x.com").await;
        settle(&mut host).await;

        room.frame(
            "c1".to_string(),
            InboundFrame::KickParticipant {
                participant_email: "user@x.com".to_string(),
                reason: "double session".to_string(),
            },
        )
        .await;

        // Both of the identity's connections get the notice, then close.
        next_of_type(&mut tab_one, "kicked").await;
        assert!(
            tokio::time::timeout(Duration::from_secs(1), tab_one.recv())
                .await
                .unwrap()
                .is_none()
        );
        next_of_type(&mut tab_two, "kicked").await;
        assert!(
            tokio::time::timeout(Duration::from_secs(1), tab_two.recv())
                .await
                .unwrap()
                .is_none()
        );

        let roster = next_of_type(&mut host, "participant-list").await;
        assert_eq!(participants(&roster), vec!["host@x.com"]);
        let state = room.get_state().await.unwrap();
        assert_eq!(state.connection_count, 1);
    }

    #[tokio::test]
    async fn test_disconnect_clears_presence_and_pending() {
        let (room, _task, _cancel) = spawn_room(Some("host@x.com"), settings());
        let mut host = join(&room, "c1", "host@x.com").await;
        let _user = join(&room, "c2", "user@x.com").await;

        room.frame("c2".to_string(), InboundFrame::JoinRequest).await;
        next_of_type(&mut host, "join_request_notification").await;

        room.connection_closed("c2".to_string()).await;

        let roster = next_of_type(&mut host, "participant-list").await;
        assert_eq!(participants(&roster), vec!["host@x.com"]);

        let state = room.get_state().await.unwrap();
        assert!(state.pending_requests.is_empty());
        assert_eq!(state.participants, vec!["host@x.com"]);
    }

    #[tokio::test]
    async fn test_room_purges_when_last_connection_leaves() {
        let (room, task, _cancel) = spawn_room(None, settings());
        let _alice = join(&room, "c1", "alice@x.com").await;

        room.connection_closed("c1".to_string()).await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("room actor should exit when empty")
            .unwrap();
        assert!(room.is_closed());

        // A stale handle observes the closed room.
        let (tx, _rx) = mpsc::channel(8);
        let err = room
            .join("c2".to_string(), "bob@x.com".to_string(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::RoomClosed(_)));
    }

    #[tokio::test]
    async fn test_set_host_first_write_wins() {
        let (room, _task, _cancel) = spawn_room(None, settings());
        let _alice = join(&room, "c1", "alice@x.com").await;

        room.set_host("host@x.com".to_string()).await;
        room.set_host("usurper@x.com".to_string()).await;

        let state = room.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("host@x.com"));
    }

    #[tokio::test]
    async fn test_cancellation_closes_all_connections() {
        let (room, task, cancel) = spawn_room(None, settings());
        let mut alice = join(&room, "c1", "alice@x.com").await;
        let mut bob = join(&room, "c2", "bob@x.com").await;

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        // Outbound channels end once the connection actors stop.
        while alice.recv().await.is_some() {}
        while bob.recv().await.is_some() {}
    }
}
