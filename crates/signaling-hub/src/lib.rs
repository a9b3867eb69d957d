//! Room Signaling Hub
//!
//! A stateful WebSocket signaling server for meeting rooms. Participants
//! connect to `/ws/{room_key}?email=...` and the hub relays WebRTC
//! signaling between them, broadcasts chat with replayable history,
//! tracks presence, and enforces host-gated admission and removal.
//!
//! # Architecture
//!
//! The hub is a hierarchy of actors, one registry per process:
//!
//! ```text
//! transport (axum)            actors
//! ----------------            ------
//! GET /ws/{room_key}  ----->  RoomRegistryActor
//! PUT /rooms/../host            |
//! GET /rooms/../participants    +-- RoomActor (per room)
//!                                     |
//!                                     +-- ConnectionActor (per socket)
//! ```
//!
//! Rooms are created on first join and purged, with all of their state,
//! when the last connection leaves. See [`actors`] for the actor
//! hierarchy, [`protocol`] for the wire format, and [`transport`] for
//! the HTTP surface.

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod transport;
