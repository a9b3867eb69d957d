//! Room registry actor: owns the room table and the host directory.
//!
//! The registry is the single entry point for joins and collaborator API
//! calls. It spawns room actors on first join (or first host binding),
//! reaps them once they purge, and fans shutdown out to every room.

use crate::actors::messages::{
    JoinTicket, RegistryMessage, RegistryStatus, RoomSettings,
};
use crate::actors::metrics::HubMetrics;
use crate::actors::room::RoomActorHandle;
use crate::errors::HubError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mailbox depth for the registry actor.
const MAILBOX_SIZE: usize = 256;

/// Interval between sweeps for purged rooms.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a room actor task during shutdown.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for communicating with the room registry actor.
#[derive(Debug, Clone)]
pub struct RoomRegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryActorHandle {
    /// Spawn the registry actor.
    pub fn spawn(
        hub_id: String,
        settings: RoomSettings,
        metrics: Arc<HubMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor {
            hub_id,
            settings,
            metrics,
            receiver,
            rooms: HashMap::new(),
            hosts: HashMap::new(),
            draining: false,
            cancel_token: cancel_token.clone(),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Admit a connection into a room, spawning the room if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Draining`] during shutdown, or
    /// [`HubError::Internal`] when the registry itself is gone.
    pub async fn join(
        &self,
        room_key: String,
        identity: String,
        outbound: mpsc::Sender<String>,
    ) -> Result<JoinTicket, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                room_key,
                identity,
                outbound,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Internal("registry unavailable".to_string()))?;
        response
            .await
            .map_err(|_| HubError::Internal("registry dropped request".to_string()))?
    }

    /// Bind a room's host. The first binding wins.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Internal`] when the registry is gone.
    pub async fn set_host(&self, room_key: String, host: String) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::SetHost {
                room_key,
                host,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Internal("registry unavailable".to_string()))?;
        response
            .await
            .map_err(|_| HubError::Internal("registry dropped request".to_string()))?
    }

    /// Snapshot the presence roster of a room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`] when the room has no live actor.
    pub async fn room_participants(&self, room_key: String) -> Result<Vec<String>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::RoomParticipants {
                room_key,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Internal("registry unavailable".to_string()))?;
        response
            .await
            .map_err(|_| HubError::Internal("registry dropped request".to_string()))?
    }

    /// Report hub-wide status.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Internal`] when the registry is gone.
    pub async fn status(&self) -> Result<RegistryStatus, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to })
            .await
            .map_err(|_| HubError::Internal("registry unavailable".to_string()))?;
        response
            .await
            .map_err(|_| HubError::Internal("registry dropped request".to_string()))
    }

    /// Drain and shut down every room, then the registry itself.
    pub async fn shutdown(&self) {
        let (respond_to, response) = oneshot::channel();
        if self
            .sender
            .send(RegistryMessage::Shutdown { respond_to })
            .await
            .is_ok()
        {
            let _ = response.await;
        }
        self.cancel_token.cancel();
    }
}

/// A room tracked by the registry.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// Registry actor state.
struct RegistryActor {
    hub_id: String,
    settings: RoomSettings,
    metrics: Arc<HubMetrics>,
    receiver: mpsc::Receiver<RegistryMessage>,
    rooms: HashMap<String, ManagedRoom>,
    /// Host directory: room key -> host identity. An entry is written at
    /// most once and dropped when its room is reaped.
    hosts: HashMap<String, String>,
    draining: bool,
    cancel_token: CancellationToken,
}

impl RegistryActor {
    async fn run(mut self) {
        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            "Room registry started"
        );

        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health_interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        "Registry cancelled, shutting down rooms"
                    );
                    self.shutdown_rooms().await;
                    break;
                }
                _ = health_interval.tick() => {
                    self.check_room_health();
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(RegistryMessage::Shutdown { respond_to }) => {
                            self.draining = true;
                            self.shutdown_rooms().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(msg) => self.handle_message(msg).await,
                        None => {
                            self.shutdown_rooms().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            "Room registry stopped"
        );
    }

    async fn handle_message(&mut self, msg: RegistryMessage) {
        match msg {
            RegistryMessage::Join {
                room_key,
                identity,
                outbound,
                respond_to,
            } => {
                let result = self.handle_join(room_key, identity, outbound).await;
                let _ = respond_to.send(result);
            }
            RegistryMessage::SetHost {
                room_key,
                host,
                respond_to,
            } => {
                self.handle_set_host(&room_key, host).await;
                let _ = respond_to.send(Ok(()));
            }
            RegistryMessage::RoomParticipants {
                room_key,
                respond_to,
            } => {
                let result = self.handle_room_participants(&room_key).await;
                let _ = respond_to.send(result);
            }
            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    hub_id: self.hub_id.clone(),
                    room_count: self.rooms.len(),
                    connection_count: self.metrics.snapshot().connections as usize,
                    is_draining: self.draining,
                });
            }
            RegistryMessage::Shutdown { .. } => {
                // Handled in the run loop.
            }
        }
    }

    async fn handle_join(
        &mut self,
        room_key: String,
        identity: String,
        outbound: mpsc::Sender<String>,
    ) -> Result<JoinTicket, HubError> {
        if self.draining {
            return Err(HubError::Draining);
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let room = self.room_or_spawn(&room_key);

        match room
            .join(connection_id.clone(), identity.clone(), outbound.clone())
            .await
        {
            Ok(()) => Ok(JoinTicket {
                connection_id,
                room,
            }),
            Err(HubError::RoomClosed(_)) => {
                // The room purged between lookup and join: reap the stale
                // entry and retry once against a fresh room.
                debug!(
                    target: "hub.actor.registry",
                    room_key = %room_key,
                    "Join hit a purged room, respawning"
                );
                self.reap_room(&room_key);
                let room = self.room_or_spawn(&room_key);
                room.join(connection_id.clone(), identity, outbound)
                    .await
                    .map(|()| JoinTicket {
                        connection_id,
                        room,
                    })
                    .map_err(|e| HubError::Internal(format!("join retry failed: {e}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_set_host(&mut self, room_key: &str, host: String) {
        // First binding wins; later writes are ignored.
        let bound = self
            .hosts
            .entry(room_key.to_string())
            .or_insert_with(|| host.clone());
        if *bound != host {
            warn!(
                target: "hub.actor.registry",
                room_key = %room_key,
                existing = %bound,
                rejected = %host,
                "Ignoring host rebinding attempt"
            );
            return;
        }

        if let Some(room) = self.rooms.get(room_key) {
            room.handle.set_host(host).await;
        }
    }

    async fn handle_room_participants(&mut self, room_key: &str) -> Result<Vec<String>, HubError> {
        let Some(room) = self.rooms.get(room_key) else {
            return Err(HubError::RoomNotFound(room_key.to_string()));
        };

        match room.handle.get_state().await {
            Ok(state) => Ok(state.participants),
            Err(_) => {
                self.reap_room(room_key);
                Err(HubError::RoomNotFound(room_key.to_string()))
            }
        }
    }

    /// Look up a live room or spawn a fresh one.
    fn room_or_spawn(&mut self, room_key: &str) -> RoomActorHandle {
        if let Some(room) = self.rooms.get(room_key) {
            if !room.handle.is_closed() {
                return room.handle.clone();
            }
            self.reap_room(room_key);
        }

        let host = self.hosts.get(room_key).cloned();
        let (handle, task_handle) = RoomActorHandle::spawn(
            room_key.to_string(),
            host,
            self.settings,
            Arc::clone(&self.metrics),
            &self.cancel_token,
        );
        self.metrics.room_created();
        self.rooms.insert(
            room_key.to_string(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        handle
    }

    /// Drop a purged room and its host binding.
    fn reap_room(&mut self, room_key: &str) {
        if let Some(room) = self.rooms.remove(room_key) {
            room.handle.cancel();
            room.task_handle.abort();
            self.hosts.remove(room_key);
            self.metrics.room_removed();
            info!(
                target: "hub.actor.registry",
                room_key = %room_key,
                rooms = self.rooms.len(),
                "Room reaped"
            );
        }
    }

    /// Sweep out rooms whose actors have exited.
    fn check_room_health(&mut self) {
        let purged: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.handle.is_closed() || room.task_handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for room_key in purged {
            self.reap_room(&room_key);
        }
    }

    async fn shutdown_rooms(&mut self) {
        for (room_key, room) in self.rooms.drain() {
            room.handle.cancel();
            if tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, room.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "hub.actor.registry",
                    room_key = %room_key,
                    "Room actor did not stop during shutdown"
                );
            }
            self.metrics.room_removed();
        }
        self.hosts.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn settings() -> RoomSettings {
        RoomSettings {
            max_chat_history: 1000,
            notify_denied_actions: false,
        }
    }

    fn spawn_registry() -> (RoomRegistryActorHandle, JoinHandle<()>) {
        RoomRegistryActorHandle::spawn("hub-test".to_string(), settings(), HubMetrics::new())
    }

    async fn join(
        registry: &RoomRegistryActorHandle,
        room_key: &str,
        identity: &str,
    ) -> (JoinTicket, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let ticket = registry
            .join(room_key.to_string(), identity.to_string(), tx)
            .await
            .expect("join should succeed");
        (ticket, rx)
    }

    #[tokio::test]
    async fn test_joins_to_same_key_share_a_room() {
        let (registry, _task) = spawn_registry();

        let (ticket_a, _rx_a) = join(&registry, "standup", "alice@x.com").await;
        let (ticket_b, _rx_b) = join(&registry, "standup", "bob@x.com").await;
        assert_ne!(ticket_a.connection_id, ticket_b.connection_id);

        let state = ticket_a.room.get_state().await.unwrap();
        assert_eq!(state.connection_count, 2);
        assert_eq!(state.room_key, "standup");

        let status = registry.status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert_eq!(status.connection_count, 2);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let (registry, _task) = spawn_registry();

        let (ticket_a, _rx_a) = join(&registry, "standup", "alice@x.com").await;
        let (_ticket_b, _rx_b) = join(&registry, "retro", "bob@x.com").await;

        let state = ticket_a.room.get_state().await.unwrap();
        assert_eq!(state.participants, vec!["alice@x.com"]);

        let status = registry.status().await.unwrap();
        assert_eq!(status.room_count, 2);
    }

    #[tokio::test]
    async fn test_pre_bound_host_reaches_new_room() {
        let (registry, _task) = spawn_registry();

        registry
            .set_host("standup".to_string(), "host@x.com".to_string())
            .await
            .unwrap();
        let (ticket, _rx) = join(&registry, "standup", "host@x.com").await;

        let state = ticket.room.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("host@x.com"));
    }

    #[tokio::test]
    async fn test_host_binding_is_write_once() {
        let (registry, _task) = spawn_registry();

        registry
            .set_host("standup".to_string(), "host@x.com".to_string())
            .await
            .unwrap();
        registry
            .set_host("standup".to_string(), "usurper@x.com".to_string())
            .await
            .unwrap();

        let (ticket, _rx) = join(&registry, "standup", "host@x.com").await;
        let state = ticket.room.get_state().await.unwrap();
        assert_eq!(state.host.as_deref(), Some("host@x.com"));
    }

    #[tokio::test]
    async fn test_participants_query() {
        let (registry, _task) = spawn_registry();

        let err = registry
            .room_participants("nowhere".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::RoomNotFound(_)));

        let (_ticket, _rx) = join(&registry, "standup", "alice@x.com").await;
        let participants = registry
            .room_participants("standup".to_string())
            .await
            .unwrap();
        assert_eq!(participants, vec!["alice@x.com"]);
    }

    #[tokio::test]
    async fn test_rejoin_after_purge_gets_fresh_room() {
        let (registry, _task) = spawn_registry();

        let (ticket, _rx) = join(&registry, "standup", "alice@x.com").await;
        ticket
            .room
            .connection_closed(ticket.connection_id.clone())
            .await;

        // Wait for the room actor to purge itself.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !ticket.room.is_closed() {
            assert!(tokio::time::Instant::now() < deadline, "room never purged");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The registry still holds the stale entry; a join must recover.
        let (ticket, _rx) = join(&registry, "standup", "bob@x.com").await;
        let state = ticket.room.get_state().await.unwrap();
        assert_eq!(state.participants, vec!["bob@x.com"]);
        assert!(state.chat_len == 0);
    }

    #[tokio::test]
    async fn test_draining_rejects_new_joins() {
        let (registry, task) = spawn_registry();

        let (_ticket, mut rx) = join(&registry, "standup", "alice@x.com").await;
        registry.shutdown().await;

        // Existing connections are closed as their rooms drain.
        while rx.recv().await.is_some() {}

        let (tx, _rx) = mpsc::channel(8);
        let err = registry
            .join("standup".to_string(), "bob@x.com".to_string(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Draining | HubError::Internal(_)));

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
