//! HTTP surface of the hub: WebSocket upgrades and the collaborator API.

pub mod api;
pub mod ws;

use crate::actors::RoomRegistryActorHandle;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Shared state for the signaling router.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: RoomRegistryActorHandle,
    /// Depth of each connection's outbound frame queue.
    pub outbound_queue_size: usize,
}

/// Build the signaling router: `/ws/{room_key}` plus the room API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:room_key", get(ws::ws_handler))
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
