//! Room Signaling Hub error types.
//!
//! A single room's or connection's failure must never take down the process
//! or affect other rooms: every variant here is recovered locally by the
//! layer that observes it. Internal details are logged server-side and not
//! exposed to clients.

use thiserror::Error;

/// Hub-wide error type.
#[derive(Debug, Error)]
pub enum HubError {
    /// The target room's actor has shut down (its mailbox is closed).
    ///
    /// Callers holding a stale handle see this when the room was purged
    /// after its last connection left; the registry recovers by spawning
    /// a fresh room.
    #[error("Room closed: {0}")]
    RoomClosed(String),

    /// Room not found (query against a room with no live actor).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The hub is draining (graceful shutdown) and rejects new joins.
    #[error("Hub is draining")]
    Draining,

    /// Inbound frame failed to parse into a typed message.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal error (channel plumbing, serialization of outbound events).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Typed parse failures for inbound frames.
///
/// Malformed frames are logged and dropped; the connection survives
/// (one bad frame must never terminate a session).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or not a JSON object.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame is missing the `type` discriminator.
    #[error("Frame missing type discriminator")]
    MissingType,

    /// A required payload field is missing or has the wrong shape.
    #[error("Frame `{frame}` missing required field `{field}`")]
    MissingField {
        frame: &'static str,
        field: &'static str,
    },
}

impl HubError {
    /// Returns a client-safe message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            HubError::RoomClosed(_) | HubError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            HubError::RoomNotFound(_) => "Room not found".to_string(),
            HubError::Draining => "Server is shutting down, please reconnect".to_string(),
            HubError::Protocol(_) => "Invalid message".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = HubError::Internal("mpsc sender dropped at room standup-42".to_string());
        assert!(!err.client_message().contains("standup-42"));

        let err = HubError::RoomClosed("standup-42".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", HubError::RoomNotFound("r1".to_string())),
            "Room not found: r1"
        );
        assert_eq!(
            format!(
                "{}",
                HubError::Protocol(ProtocolError::MissingField {
                    frame: "chat",
                    field: "message",
                })
            ),
            "Protocol error: Frame `chat` missing required field `message`"
        );
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: HubError = ProtocolError::MissingType.into();
        assert!(matches!(err, HubError::Protocol(_)));
    }
}
