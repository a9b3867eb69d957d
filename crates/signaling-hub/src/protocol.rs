//! Wire protocol for the signaling WebSocket.
//!
//! Every frame is a JSON object with a string `type` discriminator. Inbound
//! frames parse into the closed [`InboundFrame`] sum type; anything the hub
//! relays without interpretation (WebRTC signaling, unrecognized types)
//! keeps its original text so relay delivery is byte-for-byte verbatim.
//!
//! Outbound events are built as [`ServerEvent`] values and serialized once
//! per delivery. Field names on the wire are camelCase where clients expect
//! them (`requesterEmail`, `kickedBy`, `roomId`, ...).

use crate::errors::ProtocolError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat message retained in a room's history and replayed to new joiners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntry {
    /// Participant identity of the sender.
    pub sender: String,
    /// Message text.
    pub message: String,
    /// Append timestamp (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,
}

/// WebRTC signaling frame kinds relayed without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wire value of the `type` discriminator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// A parsed inbound frame.
///
/// Each variant carries only its required fields; relay variants keep the
/// raw frame text for verbatim forwarding.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// `chat` - append to history and broadcast to the whole room.
    Chat { message: String },

    /// `join_request` - request admission; auto-approved when the room has
    /// no registered host.
    JoinRequest,

    /// `approval` - legacy path, broadcast verbatim to the room.
    Approval { raw: String },

    /// `accept_join_request` - host-only admission of a pending requester.
    AcceptJoinRequest { requester_email: String },

    /// `reject_join_request` - host-only rejection of a pending requester.
    RejectJoinRequest {
        requester_email: String,
        reason: String,
    },

    /// `kick_participant` - host-only forced removal.
    KickParticipant {
        participant_email: String,
        reason: String,
    },

    /// `offer` / `answer` / `ice-candidate` - relayed to all other
    /// connections, never echoed back to the sender.
    Signal { kind: SignalKind, raw: String },

    /// Any other `type` - relayed verbatim to all connections in the room.
    Other { frame_type: String, raw: String },
}

impl InboundFrame {
    /// Parse a raw frame into its typed form.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the text is not a JSON object, the
    /// `type` discriminator is missing, or a recognized type lacks one of
    /// its required fields. Callers log and drop such frames; the
    /// connection stays open.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        let frame = match frame_type {
            "chat" => InboundFrame::Chat {
                message: required_str(&value, "chat", "message")?,
            },
            "join_request" => InboundFrame::JoinRequest,
            "approval" => InboundFrame::Approval {
                raw: text.to_string(),
            },
            "accept_join_request" => InboundFrame::AcceptJoinRequest {
                requester_email: required_str(&value, "accept_join_request", "requesterEmail")?,
            },
            "reject_join_request" => InboundFrame::RejectJoinRequest {
                requester_email: required_str(&value, "reject_join_request", "requesterEmail")?,
                reason: required_str(&value, "reject_join_request", "reason")?,
            },
            "kick_participant" => InboundFrame::KickParticipant {
                participant_email: required_str(&value, "kick_participant", "participantEmail")?,
                reason: required_str(&value, "kick_participant", "reason")?,
            },
            "offer" => InboundFrame::Signal {
                kind: SignalKind::Offer,
                raw: text.to_string(),
            },
            "answer" => InboundFrame::Signal {
                kind: SignalKind::Answer,
                raw: text.to_string(),
            },
            "ice-candidate" => InboundFrame::Signal {
                kind: SignalKind::IceCandidate,
                raw: text.to_string(),
            },
            other => InboundFrame::Other {
                frame_type: other.to_string(),
                raw: text.to_string(),
            },
        };

        Ok(frame)
    }
}

/// Extract a required string field from a frame object.
fn required_str(
    value: &Value,
    frame: &'static str,
    field: &'static str,
) -> Result<String, ProtocolError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or(ProtocolError::MissingField { frame, field })
}

/// An event emitted by the hub to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A chat message, broadcast to the whole room including the sender.
    #[serde(rename = "chat")]
    Chat {
        message: String,
        sender: String,
        timestamp: DateTime<Utc>,
    },

    /// Current presence snapshot, broadcast after every membership change.
    /// Member order carries no meaning.
    #[serde(rename = "participant-list")]
    ParticipantList { participants: Vec<String> },

    /// Full retained chat history, sent once to a freshly joined
    /// connection (omitted when the history is empty).
    #[serde(rename = "chat-history")]
    ChatHistory { messages: Vec<ChatEntry> },

    /// Targeted notification to the room host about a pending admission.
    #[serde(rename = "join_request_notification")]
    JoinRequestNotification {
        requester: String,
        timestamp: DateTime<Utc>,
    },

    /// Admission confirmation, broadcast to the room.
    #[serde(rename = "approval")]
    Approval {
        email: String,
        status: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Sent only to the kicked connection, just before it is closed.
    #[serde(rename = "kicked")]
    Kicked {
        reason: String,
        #[serde(rename = "kickedBy")]
        kicked_by: String,
    },

    /// Broadcast to the surviving connections after a kick.
    #[serde(rename = "participant_kicked")]
    ParticipantKicked {
        #[serde(rename = "participantEmail")]
        participant_email: String,
        #[serde(rename = "kickedBy")]
        kicked_by: String,
        reason: String,
    },

    /// Sent only to the rejected connection, just before it is closed.
    #[serde(rename = "join_rejected")]
    JoinRejected {
        reason: String,
        #[serde(rename = "rejectedBy")]
        rejected_by: String,
    },

    /// Sent to a non-host connection that attempted a host-gated action,
    /// only when `HUB_NOTIFY_DENIED_ACTIONS` is enabled. The default is
    /// a silent drop.
    #[serde(rename = "action_denied")]
    ActionDenied { action: String },

    /// Terminal error delivered just before the hub closes a socket it
    /// could not admit (for example while draining).
    #[serde(rename = "error")]
    Error { message: String },
}

/// Admission status value used in `approval` events.
pub const APPROVAL_STATUS_APPROVED: &str = "approved";

/// Payload handed to a connection actor for delivery.
///
/// `Raw` carries frame text forwarded verbatim (signaling relay and
/// fallback broadcast); `Event` is serialized at delivery time.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Raw(String),
}

impl Outbound {
    /// Render the payload as wire text.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error; `ServerEvent` values
    /// contain nothing unserializable, so this is effectively unreachable
    /// and callers log-and-drop on failure.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Event(event) => serde_json::to_string(event),
            Outbound::Raw(text) => Ok(text.clone()),
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

    #[test]
    fn test_parse_chat() {
        let frame = InboundFrame::parse(r#"{"type":"chat","message":"hello"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Chat { message } if message == "hello"));
    }

    #[test]
    fn test_parse_chat_missing_message() {
        let err = InboundFrame::parse(r#"{"type":"chat"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField {
                frame: "chat",
                field: "message"
            }
        ));
    }

    #[test]
    fn test_parse_join_request() {
        let frame = InboundFrame::parse(r#"{"type":"join_request"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::JoinRequest));
    }

    #[test]
    fn test_parse_host_actions() {
        let frame =
            InboundFrame::parse(r#"{"type":"accept_join_request","requesterEmail":"u@x.com"}"#)
                .unwrap();
        assert!(
            matches!(frame, InboundFrame::AcceptJoinRequest { requester_email } if requester_email == "u@x.com")
        );

        let frame = InboundFrame::parse(
            r#"{"type":"reject_join_request","requesterEmail":"u@x.com","reason":"full"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            InboundFrame::RejectJoinRequest { requester_email, reason }
                if requester_email == "u@x.com" && reason == "full"
        ));

        let frame = InboundFrame::parse(
            r#"{"type":"kick_participant","participantEmail":"u@x.com","reason":"spam"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            InboundFrame::KickParticipant { participant_email, reason }
                if participant_email == "u@x.com" && reason == "spam"
        ));
    }

    #[test]
    fn test_parse_signal_keeps_raw_text() {
        let text = r#"{"type":"offer","sdp":"v=0...","target":"u@x.com"}"#;
        let frame = InboundFrame::parse(text).unwrap();
        match frame {
            InboundFrame::Signal { kind, raw } => {
                assert_eq!(kind, SignalKind::Offer);
                assert_eq!(raw, text);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let text = r#"{"type":"ice-candidate","candidate":{}}"#;
        assert!(matches!(
            InboundFrame::parse(text).unwrap(),
            InboundFrame::Signal {
                kind: SignalKind::IceCandidate,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_unknown_type_falls_back_to_other() {
        let text = r#"{"type":"raise_hand","participant":"u@x.com"}"#;
        let frame = InboundFrame::parse(text).unwrap();
        match frame {
            InboundFrame::Other { frame_type, raw } => {
                assert_eq!(frame_type, "raise_hand");
                assert_eq!(raw, text);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_and_missing_type() {
        assert!(matches!(
            InboundFrame::parse("not json").unwrap_err(),
            ProtocolError::Malformed(_)
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"message":"no discriminator"}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
        // A non-string discriminator is as useless as a missing one.
        assert!(matches!(
            InboundFrame::parse(r#"{"type":42}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
    }

    #[test]
    fn test_server_event_wire_shapes() {
        let event = ServerEvent::ParticipantList {
            participants: vec!["a@x.com".to_string(), "b@x.com".to_string()],
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "participant-list");
        assert_eq!(value["participants"][0], "a@x.com");

        let event = ServerEvent::ParticipantKicked {
            participant_email: "u@x.com".to_string(),
            kicked_by: "h@x.com".to_string(),
            reason: "spam".to_string(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "participant_kicked");
        assert_eq!(value["participantEmail"], "u@x.com");
        assert_eq!(value["kickedBy"], "h@x.com");

        let event = ServerEvent::Approval {
            email: "u@x.com".to_string(),
            status: APPROVAL_STATUS_APPROVED.to_string(),
            room_id: "r1".to_string(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "approval");
        assert_eq!(value["status"], "approved");
        assert_eq!(value["roomId"], "r1");

        let event = ServerEvent::JoinRejected {
            reason: "full".to_string(),
            rejected_by: "h@x.com".to_string(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "join_rejected");
        assert_eq!(value["rejectedBy"], "h@x.com");

        let event = ServerEvent::Error {
            message: "Server is shutting down, please reconnect".to_string(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Server is shutting down, please reconnect");
    }

    #[test]
    fn test_chat_history_preserves_order() {
        let entries = vec![
            ChatEntry {
                sender: "a@x.com".to_string(),
                message: "first".to_string(),
                timestamp: Utc::now(),
            },
            ChatEntry {
                sender: "b@x.com".to_string(),
                message: "second".to_string(),
                timestamp: Utc::now(),
            },
        ];
        let event = ServerEvent::ChatHistory {
            messages: entries.clone(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "chat-history");
        assert_eq!(value["messages"][0]["message"], "first");
        assert_eq!(value["messages"][1]["message"], "second");
    }

    #[test]
    fn test_outbound_raw_is_verbatim() {
        let text = r#"{"type":"offer","sdp":"v=0"}"#;
        let payload = Outbound::Raw(text.to_string());
        assert_eq!(payload.to_text().unwrap(), text);
    }
}
