//! Collaborator API for room management.
//!
//! A meeting-management service binds a host to a room before (or after)
//! participants connect, and can inspect a live room's roster. Host
//! binding is write-once per room lifetime.

use crate::errors::HubError;
use crate::transport::ws::validate_identity;
use crate::transport::AppState;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetHostRequest {
    pub host_email: String,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Build the room management routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/:room_key/host", put(set_host))
        .route("/rooms/:room_key/participants", get(participants))
}

/// `PUT /rooms/{room_key}/host` - bind the room host (first write wins).
async fn set_host(
    Path(room_key): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<SetHostRequest>,
) -> Response {
    let host = match validate_identity(Some(&request.host_email)) {
        Ok(host) => host,
        Err(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: reason.to_string(),
                }),
            )
                .into_response();
        }
    };

    match state.registry.set_host(room_key, host).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(
                target: "hub.transport.api",
                error = %e,
                "Failed to bind host"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.client_message(),
                }),
            )
                .into_response()
        }
    }
}

/// `GET /rooms/{room_key}/participants` - roster of a live room.
async fn participants(
    Path(room_key): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.registry.room_participants(room_key).await {
        Ok(mut participants) => {
            participants.sort();
            Json(ParticipantsResponse { participants }).into_response()
        }
        Err(HubError::RoomNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Room not found".to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.client_message(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::{HubMetrics, RoomRegistryActorHandle, RoomSettings};
    use crate::transport;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_router() -> (Router, RoomRegistryActorHandle) {
        let (registry, _task) = RoomRegistryActorHandle::spawn(
            "hub-test".to_string(),
            RoomSettings {
                max_chat_history: 1000,
                notify_denied_actions: false,
            },
            HubMetrics::new(),
        );
        let router = transport::router(AppState {
            registry: registry.clone(),
            outbound_queue_size: 64,
        });
        (router, registry)
    }

    #[tokio::test]
    async fn test_set_host_returns_no_content() {
        let (router, _registry) = test_router();

        let response = router
            .oneshot(
                Request::put("/rooms/standup/host")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"hostEmail":"host@x.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_set_host_rejects_blank_identity() {
        let (router, _registry) = test_router();

        let response = router
            .oneshot(
                Request::put("/rooms/standup/host")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"hostEmail":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_participants_not_found_for_unknown_room() {
        let (router, _registry) = test_router();

        let response = router
            .oneshot(
                Request::get("/rooms/nowhere/participants")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_participants_lists_live_room() {
        let (router, registry) = test_router();

        let (tx, _rx) = mpsc::channel(8);
        registry
            .join("standup".to_string(), "alice@x.com".to_string(), tx)
            .await
            .unwrap();

        let response = router
            .oneshot(
                Request::get("/rooms/standup/participants")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["participants"][0], "alice@x.com");
    }
}
