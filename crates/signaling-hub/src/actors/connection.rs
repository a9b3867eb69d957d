//! Connection actor: delivery endpoint for a single WebSocket session.
//!
//! The actor owns the sending half of the session's outbound text channel;
//! the transport's write task owns the other end and forwards each payload
//! to the socket. Dropping the sender (actor exit) is what closes the
//! socket, so every close path funnels through this actor's shutdown.

use crate::actors::messages::{CloseReason, ConnectionMessage};
use crate::actors::metrics::HubMetrics;
use crate::protocol::Outbound;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mailbox depth for a connection actor.
const MAILBOX_SIZE: usize = 64;

/// Handle for communicating with a connection actor.
#[derive(Debug, Clone)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
}

impl ConnectionActorHandle {
    /// Spawn a connection actor.
    ///
    /// `outbound` is the serialized-frame channel drained by the
    /// transport's socket write task.
    pub fn spawn(
        connection_id: String,
        identity: String,
        room_key: String,
        outbound: mpsc::Sender<String>,
        metrics: Arc<HubMetrics>,
        parent_cancel: &CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let cancel_token = parent_cancel.child_token();

        let actor = ConnectionActor {
            connection_id,
            identity,
            room_key,
            receiver,
            outbound,
            metrics,
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

    /// Queue a payload for delivery. Returns `false` when the actor is gone.
    pub fn deliver(&self, payload: Outbound) -> bool {
        self.sender
            .try_send(ConnectionMessage::Deliver { payload })
            .is_ok()
    }

    /// Ask the actor to close the connection.
    pub fn close(&self, reason: CloseReason) {
        // Queued after any pending deliveries, so a targeted event (e.g.
        // `kicked`) reaches the wire before the socket closes.
        let _ = self.sender.try_send(ConnectionMessage::Close { reason });
    }

    /// Cancel the actor immediately, skipping queued deliveries.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Connection actor state.
struct ConnectionActor {
    connection_id: String,
    identity: String,
    room_key: String,
    receiver: mpsc::Receiver<ConnectionMessage>,
    outbound: mpsc::Sender<String>,
    metrics: Arc<HubMetrics>,
    cancel_token: CancellationToken,
}

impl ConnectionActor {
    async fn run(mut self) {
        debug!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            identity = %self.identity,
            room_key = %self.room_key,
            "Connection actor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "hub.actor.connection",
                        connection_id = %self.connection_id,
                        "Connection actor cancelled"
                    );
                    break;
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(ConnectionMessage::Deliver { payload }) => {
                            self.handle_deliver(&payload);
                        }
                        Some(ConnectionMessage::Close { reason }) => {
                            info!(
                                target: "hub.actor.connection",
                                connection_id = %self.connection_id,
                                identity = %self.identity,
                                ?reason,
                                "Closing connection"
                            );
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Dropping `self.outbound` here ends the transport write task,
        // which closes the socket.
        debug!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            "Connection actor stopped"
        );
    }

    fn handle_deliver(&self, payload: &Outbound) {
        let text = match payload.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to serialize outbound payload, dropping"
                );
                self.metrics.record_delivery_failure();
                return;
            }
        };

        // A slow client must never stall its room: when the socket queue
        // is full the payload is dropped, not awaited.
        match self.outbound.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    identity = %self.identity,
                    "Outbound queue full, dropping payload"
                );
                self.metrics.record_delivery_failure();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Socket write task is gone; the room will reap us via
                // ConnectionClosed from the transport.
                debug!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    "Outbound channel closed"
                );
                self.cancel_token.cancel();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::ServerEvent;

    use std::time::Duration;

    fn spawn_actor(
        queue: usize,
    ) -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<String>,
        CancellationToken,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue);
        let cancel = CancellationToken::new();
        let (handle, task) = ConnectionActorHandle::spawn(
            "conn-1".to_string(),
            "u@x.com".to_string(),
            "r1".to_string(),
            outbound_tx,
            HubMetrics::new(),
            &cancel,
        );
        (handle, task, outbound_rx, cancel)
    }

    #[tokio::test]
    async fn test_deliver_forwards_serialized_event() {
        let (handle, task, mut outbound_rx, _cancel) = spawn_actor(8);

        assert!(handle.deliver(Outbound::Event(ServerEvent::ParticipantList {
            participants: vec!["u@x.com".to_string()],
        })));

        let text = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("participant-list"));

        handle.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_queued_deliveries_first() {
        let (handle, task, mut outbound_rx, _cancel) = spawn_actor(8);

        handle.deliver(Outbound::Raw("first".to_string()));
        handle.close(CloseReason::Kicked);

        let text = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "first");

        // Actor exits and drops the outbound sender.
        task.await.unwrap();
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_instead_of_blocking() {
        let (handle, task, mut outbound_rx, _cancel) = spawn_actor(1);

        handle.deliver(Outbound::Raw("kept".to_string()));
        // Give the actor time to occupy the single queue slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.deliver(Outbound::Raw("dropped".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(outbound_rx.recv().await.unwrap(), "kept");

        handle.cancel();
        task.await.unwrap();
        // The second payload was dropped, not queued behind the close.
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_actor() {
        let (_handle, task, _outbound_rx, cancel) = spawn_actor(8);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
