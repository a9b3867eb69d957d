//! Actor-based core of the signaling hub.
//!
//! All mutable state lives inside actors that communicate over bounded
//! mpsc channels; there are no shared locks on the hot path.
//!
//! ```text
//! RoomRegistryActor (1 per hub)
//!   |- owns the room table and the host directory
//!   |- admits connections, spawning rooms on demand
//!   |
//!   +-- RoomActor (1 per room)
//!         |- presence, host gating, chat history, pending join requests
//!         |- routes frames: broadcast, relay-to-others, targeted sends
//!         |- purges itself when its last connection leaves
//!         |
//!         +-- ConnectionActor (1 per WebSocket session)
//!               |- serializes payloads and feeds the socket write task
//!               |- drops payloads rather than stalling the room
//! ```
//!
//! Cancellation flows down the hierarchy through child tokens: cancelling
//! the registry drains every room, which closes every connection.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::ConnectionActorHandle;
pub use messages::{
    CloseReason, JoinTicket, RegistryStatus, RoomSettings, RoomState,
};
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use registry::RoomRegistryActorHandle;
pub use room::RoomActorHandle;
